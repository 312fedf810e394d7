//! Plain constructors for handing data across the narrow array interface.
//!
//! These build fully-owned arrays; they do no compute beyond packing
//! validity bitmaps and offsets.

use bytes::Bytes;
use quiver_error::{QuiverResult, quiver_bail};
use quiver_schema::{DataType, Field, IntegerType, UnionMode};

use crate::ArrayData;
use crate::bitmap::pack_bits;
use crate::native::{NativeType, Offset, values_buffer};

fn validity_buffer(validity: Option<&[bool]>) -> Option<Bytes> {
    validity.map(|v| Bytes::from(pack_bits(v.iter().copied())))
}

impl ArrayData {
    pub fn null_array(len: usize) -> ArrayData {
        ArrayData {
            data_type: DataType::Null,
            len,
            offset: 0,
            null_count: len,
            validity: None,
            buffers: vec![],
            children: vec![],
            dictionary: None,
        }
    }

    pub fn from_vec<T: NativeType>(values: Vec<T>) -> ArrayData {
        let len = values.len();
        ArrayData {
            data_type: T::data_type(),
            len,
            offset: 0,
            null_count: 0,
            validity: None,
            buffers: vec![values_buffer(&values)],
            children: vec![],
            dictionary: None,
        }
    }

    pub fn from_options<T: NativeType + Default>(values: Vec<Option<T>>) -> ArrayData {
        let validity: Vec<bool> = values.iter().map(Option::is_some).collect();
        let dense: Vec<T> = values.into_iter().map(Option::unwrap_or_default).collect();
        let mut array = Self::from_vec(dense);
        array.null_count = validity.iter().filter(|v| !**v).count();
        array.validity = validity_buffer(Some(&validity));
        array
    }

    /// Reinterpret a fixed-width array under another logical type of the
    /// same physical width (e.g. `Int32` as `Date32`, `i128` decimals under
    /// a chosen precision and scale).
    pub fn try_with_data_type(mut self, data_type: DataType) -> QuiverResult<ArrayData> {
        if data_type.fixed_byte_width() != self.data_type.fixed_byte_width()
            || data_type.fixed_byte_width().is_none()
        {
            quiver_bail!(
                "cannot reinterpret {:?} as {:?}: physical widths differ",
                self.data_type,
                data_type
            );
        }
        self.data_type = data_type;
        Ok(self)
    }

    pub fn booleans(values: &[bool]) -> ArrayData {
        ArrayData {
            data_type: DataType::Boolean,
            len: values.len(),
            offset: 0,
            null_count: 0,
            validity: None,
            buffers: vec![Bytes::from(pack_bits(values.iter().copied()))],
            children: vec![],
            dictionary: None,
        }
    }

    pub fn boolean_from_options(values: &[Option<bool>]) -> ArrayData {
        let validity: Vec<bool> = values.iter().map(Option::is_some).collect();
        let bits: Vec<bool> = values.iter().map(|v| v.unwrap_or(false)).collect();
        let mut array = Self::booleans(&bits);
        array.null_count = validity.iter().filter(|v| !**v).count();
        array.validity = validity_buffer(Some(&validity));
        array
    }

    fn varlen<O: Offset>(
        data_type: DataType,
        items: Vec<Option<&[u8]>>,
    ) -> ArrayData {
        let len = items.len();
        let validity: Vec<bool> = items.iter().map(Option::is_some).collect();
        let null_count = validity.iter().filter(|v| !**v).count();
        let mut offsets = Vec::with_capacity(len + 1);
        let mut values = Vec::new();
        offsets.push(O::from_usize(0));
        for item in &items {
            if let Some(bytes) = item {
                values.extend_from_slice(bytes);
            }
            offsets.push(O::from_usize(values.len()));
        }
        ArrayData {
            data_type,
            len,
            offset: 0,
            null_count,
            validity: (null_count > 0).then(|| validity_buffer(Some(&validity))).flatten(),
            buffers: vec![values_buffer(&offsets), Bytes::from(values)],
            children: vec![],
            dictionary: None,
        }
    }

    pub fn utf8<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> ArrayData {
        let owned: Vec<S> = items.into_iter().collect();
        Self::varlen::<i32>(
            DataType::Utf8,
            owned.iter().map(|s| Some(s.as_ref().as_bytes())).collect(),
        )
    }

    pub fn utf8_from_options<S: AsRef<str>>(items: &[Option<S>]) -> ArrayData {
        Self::varlen::<i32>(
            DataType::Utf8,
            items
                .iter()
                .map(|s| s.as_ref().map(|s| s.as_ref().as_bytes()))
                .collect(),
        )
    }

    pub fn large_utf8<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> ArrayData {
        let owned: Vec<S> = items.into_iter().collect();
        Self::varlen::<i64>(
            DataType::LargeUtf8,
            owned.iter().map(|s| Some(s.as_ref().as_bytes())).collect(),
        )
    }

    pub fn binary(items: &[Option<&[u8]>]) -> ArrayData {
        Self::varlen::<i32>(DataType::Binary, items.to_vec())
    }

    pub fn large_binary(items: &[Option<&[u8]>]) -> ArrayData {
        Self::varlen::<i64>(DataType::LargeBinary, items.to_vec())
    }

    pub fn try_fixed_size_binary(width: usize, items: &[Option<&[u8]>]) -> QuiverResult<ArrayData> {
        let validity: Vec<bool> = items.iter().map(Option::is_some).collect();
        let null_count = validity.iter().filter(|v| !**v).count();
        let mut values = Vec::with_capacity(width * items.len());
        for item in items {
            match item {
                Some(bytes) => {
                    if bytes.len() != width {
                        quiver_bail!(
                            "fixed size binary value has {} bytes, expected {}",
                            bytes.len(),
                            width
                        );
                    }
                    values.extend_from_slice(bytes);
                }
                None => values.extend(std::iter::repeat_n(0u8, width)),
            }
        }
        Ok(ArrayData {
            data_type: DataType::FixedSizeBinary(width),
            len: items.len(),
            offset: 0,
            null_count,
            validity: (null_count > 0).then(|| validity_buffer(Some(&validity))).flatten(),
            buffers: vec![Bytes::from(values)],
            children: vec![],
            dictionary: None,
        })
    }

    pub fn try_decimal(
        precision: usize,
        scale: usize,
        values: Vec<i128>,
    ) -> QuiverResult<ArrayData> {
        Self::from_vec(values).try_with_data_type(DataType::Decimal(precision, scale))
    }

    pub fn try_list(
        field: Field,
        offsets: Vec<i32>,
        child: ArrayData,
        validity: Option<&[bool]>,
    ) -> QuiverResult<ArrayData> {
        Self::list_impl(
            DataType::List(Box::new(field)),
            offsets,
            child,
            validity,
        )
    }

    pub fn try_large_list(
        field: Field,
        offsets: Vec<i64>,
        child: ArrayData,
        validity: Option<&[bool]>,
    ) -> QuiverResult<ArrayData> {
        Self::list_impl(
            DataType::LargeList(Box::new(field)),
            offsets,
            child,
            validity,
        )
    }

    fn list_impl<O: Offset>(
        data_type: DataType,
        offsets: Vec<O>,
        child: ArrayData,
        validity: Option<&[bool]>,
    ) -> QuiverResult<ArrayData> {
        if offsets.is_empty() {
            quiver_bail!("offsets must contain at least one entry");
        }
        if let Some(inner) = data_type.children().first() {
            if inner.data_type != *child.data_type() {
                quiver_bail!(
                    "child type {:?} does not match declared {:?}",
                    child.data_type(),
                    inner.data_type
                );
            }
        }
        let mut prev = 0usize;
        for o in &offsets {
            let o = o.to_usize();
            if o < prev {
                quiver_bail!("offsets must be monotonically non-decreasing");
            }
            prev = o;
        }
        if prev > child.len() {
            quiver_bail!(
                "last offset {} exceeds child length {}",
                prev,
                child.len()
            );
        }
        let len = offsets.len() - 1;
        let validity = validity_buffer(validity);
        let null_count = validity
            .as_ref()
            .map(|v| len - crate::bitmap::count_set_bits(v, 0, len))
            .unwrap_or_default();
        Ok(ArrayData {
            data_type,
            len,
            offset: 0,
            null_count,
            validity,
            buffers: vec![values_buffer(&offsets)],
            children: vec![child],
            dictionary: None,
        })
    }

    pub fn try_fixed_size_list(
        field: Field,
        size: usize,
        child: ArrayData,
        validity: Option<&[bool]>,
    ) -> QuiverResult<ArrayData> {
        if size == 0 {
            quiver_bail!("fixed size list size must be positive");
        }
        if child.len() % size != 0 {
            quiver_bail!(
                "child length {} is not a multiple of list size {}",
                child.len(),
                size
            );
        }
        let len = child.len() / size;
        let validity = validity_buffer(validity);
        let null_count = validity
            .as_ref()
            .map(|v| len - crate::bitmap::count_set_bits(v, 0, len))
            .unwrap_or_default();
        Ok(ArrayData {
            data_type: DataType::FixedSizeList(Box::new(field), size),
            len,
            offset: 0,
            null_count,
            validity,
            buffers: vec![],
            children: vec![child],
            dictionary: None,
        })
    }

    pub fn try_struct(
        fields: Vec<Field>,
        children: Vec<ArrayData>,
        validity: Option<&[bool]>,
    ) -> QuiverResult<ArrayData> {
        if fields.len() != children.len() {
            quiver_bail!(
                "struct has {} fields but {} children",
                fields.len(),
                children.len()
            );
        }
        let len = children.first().map(ArrayData::len).unwrap_or_default();
        for (field, child) in fields.iter().zip(children.iter()) {
            if child.len() != len {
                quiver_bail!("struct children must share one length");
            }
            if *child.data_type() != field.data_type {
                quiver_bail!(
                    "child type {:?} does not match field {:?}",
                    child.data_type(),
                    field.data_type
                );
            }
        }
        let validity = validity_buffer(validity);
        let null_count = validity
            .as_ref()
            .map(|v| len - crate::bitmap::count_set_bits(v, 0, len))
            .unwrap_or_default();
        Ok(ArrayData {
            data_type: DataType::Struct(fields),
            len,
            offset: 0,
            null_count,
            validity,
            buffers: vec![],
            children,
            dictionary: None,
        })
    }

    pub fn try_sparse_union(
        fields: Vec<Field>,
        declared_ids: Option<Vec<i32>>,
        type_ids: Vec<i8>,
        children: Vec<ArrayData>,
    ) -> QuiverResult<ArrayData> {
        if fields.len() != children.len() {
            quiver_bail!("union has {} fields but {} children", fields.len(), children.len());
        }
        let len = type_ids.len();
        for child in &children {
            if child.len() != len {
                quiver_bail!("sparse union children must match the type id count");
            }
        }
        Ok(ArrayData {
            data_type: DataType::Union(fields, declared_ids, UnionMode::Sparse),
            len,
            offset: 0,
            null_count: 0,
            validity: None,
            buffers: vec![values_buffer(&type_ids)],
            children,
            dictionary: None,
        })
    }

    pub fn try_dense_union(
        fields: Vec<Field>,
        declared_ids: Option<Vec<i32>>,
        type_ids: Vec<i8>,
        offsets: Vec<i32>,
        children: Vec<ArrayData>,
    ) -> QuiverResult<ArrayData> {
        if fields.len() != children.len() {
            quiver_bail!("union has {} fields but {} children", fields.len(), children.len());
        }
        if type_ids.len() != offsets.len() {
            quiver_bail!("dense union type ids and offsets must have one length");
        }
        Ok(ArrayData {
            data_type: DataType::Union(fields, declared_ids, UnionMode::Dense),
            len: type_ids.len(),
            offset: 0,
            null_count: 0,
            validity: None,
            buffers: vec![values_buffer(&type_ids), values_buffer(&offsets)],
            children,
            dictionary: None,
        })
    }

    /// `entries` must be a non-nullable struct of `{key, value}`.
    pub fn try_map(
        entries_field: Field,
        offsets: Vec<i32>,
        entries: ArrayData,
        keys_sorted: bool,
        validity: Option<&[bool]>,
    ) -> QuiverResult<ArrayData> {
        if !matches!(entries.data_type().storage_type(), DataType::Struct(fields) if fields.len() == 2)
        {
            quiver_bail!("map entries must be a two-field struct");
        }
        Self::list_impl::<i32>(
            DataType::Map(Box::new(entries_field), keys_sorted),
            offsets,
            entries,
            validity,
        )
    }

    pub fn try_dictionary(
        indices: ArrayData,
        values: ArrayData,
        ordered: bool,
    ) -> QuiverResult<ArrayData> {
        let index_type = match indices.data_type() {
            DataType::Int8 => IntegerType::Int8,
            DataType::Int16 => IntegerType::Int16,
            DataType::Int32 => IntegerType::Int32,
            DataType::Int64 => IntegerType::Int64,
            DataType::UInt8 => IntegerType::UInt8,
            DataType::UInt16 => IntegerType::UInt16,
            DataType::UInt32 => IntegerType::UInt32,
            DataType::UInt64 => IntegerType::UInt64,
            other => quiver_bail!("dictionary indices must be integers, got {:?}", other),
        };
        Ok(ArrayData {
            data_type: DataType::Dictionary(
                index_type,
                Box::new(values.data_type().clone()),
                ordered,
            ),
            len: indices.len(),
            offset: indices.offset(),
            null_count: indices.null_count(),
            validity: indices.validity.clone(),
            buffers: indices.buffers.clone(),
            children: vec![],
            dictionary: Some(Box::new(values)),
        })
    }

    /// Wrap an array in an extension type; the physical layout is the
    /// storage array's, unchanged.
    pub fn extension(
        name: impl Into<String>,
        metadata: Option<String>,
        storage: ArrayData,
    ) -> ArrayData {
        let mut array = storage;
        array.data_type = DataType::Extension(
            name.into(),
            Box::new(array.data_type.clone()),
            metadata,
        );
        array
    }
}
