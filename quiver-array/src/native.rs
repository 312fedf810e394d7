use bytemuck::Pod;
use bytes::Bytes;
use quiver_schema::DataType;

/// A fixed-width value representable directly in a values buffer.
pub trait NativeType: Pod {
    fn data_type() -> DataType;
}

macro_rules! native {
    ($t:ty, $dt:expr) => {
        impl NativeType for $t {
            fn data_type() -> DataType {
                $dt
            }
        }
    };
}

native!(i8, DataType::Int8);
native!(i16, DataType::Int16);
native!(i32, DataType::Int32);
native!(i64, DataType::Int64);
native!(u8, DataType::UInt8);
native!(u16, DataType::UInt16);
native!(u32, DataType::UInt32);
native!(u64, DataType::UInt64);
native!(f32, DataType::Float32);
native!(f64, DataType::Float64);
native!(i128, DataType::Decimal(38, 0));

/// An offset element of a variable-length layout.
pub trait Offset: NativeType {
    fn to_usize(self) -> usize;
    fn from_usize(v: usize) -> Self;
}

impl Offset for i32 {
    fn to_usize(self) -> usize {
        self as usize
    }

    fn from_usize(v: usize) -> Self {
        v as i32
    }
}

impl Offset for i64 {
    fn to_usize(self) -> usize {
        self as usize
    }

    fn from_usize(v: usize) -> Self {
        v as i64
    }
}

pub fn values_buffer<T: NativeType>(values: &[T]) -> Bytes {
    Bytes::from(bytemuck::cast_slice::<T, u8>(values).to_vec())
}

/// Read `count` values starting at element `start`, tolerating unaligned
/// buffers (wire buffers are only guaranteed 8-byte alignment).
pub fn read_values<T: NativeType>(buffer: &[u8], start: usize, count: usize) -> Vec<T> {
    let width = size_of::<T>();
    buffer[start * width..(start + count) * width]
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unaligned_read() {
        let mut raw = vec![0u8];
        raw.extend_from_slice(&values_buffer(&[1i32, -2, 3]));
        let read: Vec<i32> = read_values(&raw[1..], 1, 2);
        assert_eq!(read, vec![-2, 3]);
    }
}
