//! Per-element byte access for flat (non-nested) arrays.
//!
//! Dictionary unification works on element identity: it extracts each
//! dictionary value as bytes, dedupes across batches and rebuilds one
//! canonical values array. Only flat storage types participate; nested
//! value types report `None` and the caller surfaces `NotImplemented`.

use bytes::Bytes;
use quiver_error::{QuiverResult, quiver_bail};
use quiver_schema::DataType;

use crate::ArrayData;
use crate::bitmap::get_bit;
use crate::native::{Offset, read_values, values_buffer};

impl ArrayData {
    /// The raw bytes of element `i`, or `None` when the storage type has no
    /// flat per-element byte representation. `Some(None)` is a null element.
    pub fn element_bytes(&self, i: usize) -> Option<Option<Bytes>> {
        if !self.is_valid(i) {
            return Some(None);
        }
        let at = self.offset + i;
        match self.data_type.storage_type() {
            DataType::Boolean => {
                Some(Some(Bytes::copy_from_slice(&[u8::from(get_bit(
                    &self.buffers[0],
                    at,
                ))])))
            }
            DataType::Utf8 | DataType::Binary => {
                let [start, end]: [i32; 2] = read_values(&self.buffers[0], at, 2)
                    .try_into()
                    .ok()?;
                Some(Some(
                    self.buffers[1].slice(start.to_usize()..end.to_usize()),
                ))
            }
            DataType::LargeUtf8 | DataType::LargeBinary => {
                let [start, end]: [i64; 2] = read_values(&self.buffers[0], at, 2)
                    .try_into()
                    .ok()?;
                Some(Some(
                    self.buffers[1].slice(start.to_usize()..end.to_usize()),
                ))
            }
            other => {
                let width = other.fixed_byte_width()?;
                if other.is_dictionary() {
                    return None;
                }
                Some(Some(self.buffers[0].slice(at * width..(at + 1) * width)))
            }
        }
    }

    /// Rebuild a flat array from per-element bytes; the inverse of
    /// [`ArrayData::element_bytes`].
    pub fn try_from_elements(
        data_type: &DataType,
        elements: &[Option<Bytes>],
    ) -> QuiverResult<ArrayData> {
        match data_type.storage_type() {
            DataType::Boolean => {
                let bools: Vec<Option<bool>> = elements
                    .iter()
                    .map(|e| e.as_ref().map(|b| b.first().copied().unwrap_or(0) != 0))
                    .collect();
                Ok(ArrayData::boolean_from_options(&bools))
            }
            DataType::Utf8 | DataType::Binary => {
                varlen_from_elements::<i32>(data_type.clone(), elements)
            }
            DataType::LargeUtf8 | DataType::LargeBinary => {
                varlen_from_elements::<i64>(data_type.clone(), elements)
            }
            other => {
                let Some(width) = other.fixed_byte_width() else {
                    quiver_bail!(
                        NotImplemented: "per-element reconstruction of {:?}",
                        data_type
                    );
                };
                if other.is_dictionary() {
                    quiver_bail!(
                        NotImplemented: "per-element reconstruction of nested dictionaries"
                    );
                }
                let mut values = Vec::with_capacity(elements.len() * width);
                let mut validity = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        Some(bytes) => {
                            if bytes.len() != width {
                                quiver_bail!(
                                    "element has {} bytes, expected {}",
                                    bytes.len(),
                                    width
                                );
                            }
                            values.extend_from_slice(bytes);
                            validity.push(true);
                        }
                        None => {
                            values.extend(std::iter::repeat_n(0u8, width));
                            validity.push(false);
                        }
                    }
                }
                let null_count = validity.iter().filter(|v| !**v).count();
                Ok(ArrayData {
                    data_type: data_type.clone(),
                    len: elements.len(),
                    offset: 0,
                    null_count,
                    validity: (null_count > 0)
                        .then(|| Bytes::from(crate::bitmap::pack_bits(validity.iter().copied()))),
                    buffers: vec![Bytes::from(values)],
                    children: vec![],
                    dictionary: None,
                })
            }
        }
    }
}

fn varlen_from_elements<O: Offset>(
    data_type: DataType,
    elements: &[Option<Bytes>],
) -> QuiverResult<ArrayData> {
    let mut offsets = Vec::with_capacity(elements.len() + 1);
    let mut values = Vec::new();
    let mut validity = Vec::with_capacity(elements.len());
    offsets.push(O::from_usize(0));
    for element in elements {
        if let Some(bytes) = element {
            values.extend_from_slice(bytes);
            validity.push(true);
        } else {
            validity.push(false);
        }
        offsets.push(O::from_usize(values.len()));
    }
    let null_count = validity.iter().filter(|v| !**v).count();
    Ok(ArrayData {
        data_type,
        len: elements.len(),
        offset: 0,
        null_count,
        validity: (null_count > 0)
            .then(|| Bytes::from(crate::bitmap::pack_bits(validity.iter().copied()))),
        buffers: vec![values_buffer(&offsets), Bytes::from(values)],
        children: vec![],
        dictionary: None,
    })
}
