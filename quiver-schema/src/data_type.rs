use crate::Field;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    YearMonth,
    DayTime,
    MonthDayNano,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnionMode {
    Sparse,
    Dense,
}

impl UnionMode {
    pub fn sparse(is_sparse: bool) -> Self {
        if is_sparse { Self::Sparse } else { Self::Dense }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse)
    }
}

/// The integer types valid as dictionary indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegerType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
}

impl IntegerType {
    pub fn bit_width(&self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 8,
            Self::Int16 | Self::UInt16 => 16,
            Self::Int32 | Self::UInt32 => 32,
            Self::Int64 | Self::UInt64 => 64,
        }
    }

    pub fn byte_width(&self) -> usize {
        self.bit_width() / 8
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }
}

impl From<IntegerType> for DataType {
    fn from(int: IntegerType) -> Self {
        match int {
            IntegerType::Int8 => DataType::Int8,
            IntegerType::Int16 => DataType::Int16,
            IntegerType::Int32 => DataType::Int32,
            IntegerType::Int64 => DataType::Int64,
            IntegerType::UInt8 => DataType::UInt8,
            IntegerType::UInt16 => DataType::UInt16,
            IntegerType::UInt32 => DataType::UInt32,
            IntegerType::UInt64 => DataType::UInt64,
        }
    }
}

/// A logical columnar type.
///
/// Nested variants own their child [`Field`]s so a type tree is
/// self-contained; dictionary variants wrap the *logical* value type, never
/// the physical dictionary contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Null,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    /// Days since the UNIX epoch, 32 bits.
    Date32,
    /// Milliseconds since the UNIX epoch, 64 bits.
    Date64,
    Time32(TimeUnit),
    Time64(TimeUnit),
    Timestamp(TimeUnit, Option<String>),
    Duration(TimeUnit),
    Interval(IntervalUnit),
    /// 128-bit decimal: (precision, scale).
    Decimal(usize, usize),
    /// 256-bit decimal: (precision, scale).
    Decimal256(usize, usize),
    Utf8,
    LargeUtf8,
    Binary,
    LargeBinary,
    FixedSizeBinary(usize),
    List(Box<Field>),
    LargeList(Box<Field>),
    FixedSizeList(Box<Field>, usize),
    Struct(Vec<Field>),
    /// Child fields, optional explicit type ids, and the union mode.
    Union(Vec<Field>, Option<Vec<i32>>, UnionMode),
    /// A list of `{key, value}` structs; the flag records key ordering.
    Map(Box<Field>, bool),
    /// `(index type, value type, ordered)`.
    Dictionary(IntegerType, Box<DataType>, bool),
    /// `(name, storage type, optional serialized metadata)`.
    Extension(String, Box<DataType>, Option<String>),
}

impl DataType {
    /// See through extension wrappers to the physical storage type.
    pub fn storage_type(&self) -> &DataType {
        match self {
            DataType::Extension(_, inner, _) => inner.storage_type(),
            other => other,
        }
    }

    pub fn is_dictionary(&self) -> bool {
        matches!(self.storage_type(), DataType::Dictionary(..))
    }

    pub fn is_nested(&self) -> bool {
        matches!(
            self.storage_type(),
            DataType::List(_)
                | DataType::LargeList(_)
                | DataType::FixedSizeList(..)
                | DataType::Struct(_)
                | DataType::Union(..)
                | DataType::Map(..)
        )
    }

    /// Child fields of this type in declaration order. Dictionary types
    /// delegate to their value type: nested dictionaries are addressed
    /// through the value tree.
    pub fn children(&self) -> Vec<&Field> {
        match self.storage_type() {
            DataType::List(inner) | DataType::LargeList(inner) => vec![inner.as_ref()],
            DataType::FixedSizeList(inner, _) => vec![inner.as_ref()],
            DataType::Struct(fields) | DataType::Union(fields, _, _) => fields.iter().collect(),
            DataType::Map(entries, _) => vec![entries.as_ref()],
            DataType::Dictionary(_, values, _) => values.children(),
            _ => vec![],
        }
    }

    /// The fixed per-value byte width, when the type has one. Boolean is
    /// bit-packed and reports `None`; dictionaries report their index width.
    pub fn fixed_byte_width(&self) -> Option<usize> {
        match self.storage_type() {
            DataType::Int8 | DataType::UInt8 => Some(1),
            DataType::Int16 | DataType::UInt16 | DataType::Float16 => Some(2),
            DataType::Int32
            | DataType::UInt32
            | DataType::Float32
            | DataType::Date32
            | DataType::Time32(_) => Some(4),
            DataType::Int64
            | DataType::UInt64
            | DataType::Float64
            | DataType::Date64
            | DataType::Time64(_)
            | DataType::Timestamp(..)
            | DataType::Duration(_) => Some(8),
            DataType::Interval(IntervalUnit::YearMonth) => Some(4),
            DataType::Interval(IntervalUnit::DayTime) => Some(8),
            DataType::Interval(IntervalUnit::MonthDayNano) => Some(16),
            DataType::Decimal(..) => Some(16),
            DataType::Decimal256(..) => Some(32),
            DataType::FixedSizeBinary(size) => Some(*size),
            DataType::Dictionary(index_type, ..) => Some(index_type.byte_width()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_sees_through_extensions() {
        let ext = DataType::Extension(
            "uuid".to_string(),
            Box::new(DataType::FixedSizeBinary(16)),
            None,
        );
        assert_eq!(ext.storage_type(), &DataType::FixedSizeBinary(16));
        assert_eq!(ext.fixed_byte_width(), Some(16));
    }

    #[test]
    fn dictionary_children_come_from_values() {
        let inner = Field::new("item", DataType::Utf8, true);
        let dict = DataType::Dictionary(
            IntegerType::Int32,
            Box::new(DataType::List(Box::new(inner.clone()))),
            false,
        );
        let children = dict.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0], &inner);
    }
}
