use bytes::Bytes;
use quiver_error::{QuiverResult, quiver_bail};
use quiver_schema::{DataType, UnionMode};

use crate::bitmap::{count_set_bits, get_bit, slice_bitmap};
use crate::native::{Offset, read_values, values_buffer};

/// A typed, nullable columnar array: the `(type, length, null_count,
/// buffers, children)` shape the IPC layer serializes.
///
/// `ArrayData` is a *view*: `offset`/`len` select a window over physical
/// buffers that may be larger. [`ArrayData::compact`] rebases a view onto
/// minimal buffers; the writer works exclusively on compacted arrays so a
/// slice serializes only the bytes it references.
#[derive(Debug, Clone)]
pub struct ArrayData {
    pub(crate) data_type: DataType,
    pub(crate) len: usize,
    pub(crate) offset: usize,
    pub(crate) null_count: usize,
    /// LSB validity bitmap in physical (pre-offset) coordinates.
    pub(crate) validity: Option<Bytes>,
    /// Type-specific buffers (offsets, values, type ids), validity excluded.
    pub(crate) buffers: Vec<Bytes>,
    pub(crate) children: Vec<ArrayData>,
    /// Dictionary values when `data_type` is dictionary-encoded.
    pub(crate) dictionary: Option<Box<ArrayData>>,
}

impl ArrayData {
    /// Assemble an array from parts. `validity` covers `len` slots starting
    /// at physical position zero; the null count is derived from it.
    pub fn try_new(
        data_type: DataType,
        len: usize,
        validity: Option<Bytes>,
        buffers: Vec<Bytes>,
        children: Vec<ArrayData>,
        dictionary: Option<ArrayData>,
    ) -> QuiverResult<Self> {
        let storage = data_type.storage_type();
        if matches!(storage, DataType::Union(..) | DataType::Null) && validity.is_some() {
            quiver_bail!("{:?} arrays do not carry a validity bitmap", storage);
        }
        if data_type.is_dictionary() != dictionary.is_some() {
            quiver_bail!("dictionary values must be present iff the type is dictionary-encoded");
        }
        if let (Some(dict), DataType::Dictionary(_, value_type, _)) = (&dictionary, storage) {
            if dict.data_type() != value_type.as_ref() {
                quiver_bail!(
                    "dictionary values type {:?} does not match {:?}",
                    dict.data_type(),
                    value_type
                );
            }
        }
        let null_count = match storage {
            // Null arrays are all-null by definition, with no bitmap.
            DataType::Null => len,
            _ => validity
                .as_ref()
                .map(|v| len - count_set_bits(v, 0, len))
                .unwrap_or_default(),
        };
        Ok(Self {
            data_type,
            len,
            offset: 0,
            null_count,
            validity,
            buffers,
            children,
            dictionary: dictionary.map(Box::new),
        })
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    pub fn validity(&self) -> Option<&Bytes> {
        self.validity.as_ref()
    }

    pub fn buffers(&self) -> &[Bytes] {
        &self.buffers
    }

    pub fn children(&self) -> &[ArrayData] {
        &self.children
    }

    pub fn dictionary(&self) -> Option<&ArrayData> {
        self.dictionary.as_deref()
    }

    pub fn is_valid(&self, i: usize) -> bool {
        self.validity
            .as_ref()
            .map(|v| get_bit(v, self.offset + i))
            .unwrap_or(true)
    }

    /// A zero-copy logical window. Buffers are shared; only the view and the
    /// null count change.
    pub fn slice(&self, offset: usize, len: usize) -> ArrayData {
        assert!(
            offset + len <= self.len,
            "slice [{offset}, {}) out of bounds for array of length {}",
            offset + len,
            self.len
        );
        let start = self.offset + offset;
        let null_count = self
            .validity
            .as_ref()
            .map(|v| len - count_set_bits(v, start, len))
            .unwrap_or_default();
        ArrayData {
            data_type: self.data_type.clone(),
            len,
            offset: start,
            null_count,
            validity: self.validity.clone(),
            buffers: self.buffers.clone(),
            children: self.children.clone(),
            dictionary: self.dictionary.clone(),
        }
    }

    /// Rebase this view onto minimal buffers: offset zero, validity trimmed
    /// and tail-masked (dropped entirely when there are no nulls),
    /// variable-length offsets rebased to zero and truncated to
    /// `(len + 1) * width`, values and children cut to the referenced range.
    pub fn compact(&self) -> ArrayData {
        let validity = (self.null_count > 0)
            .then(|| self.validity.as_ref())
            .flatten()
            .map(|v| slice_bitmap(v, self.offset, self.len));

        let (buffers, children, dictionary) = match self.data_type.storage_type() {
            DataType::Null => (vec![], vec![], None),
            DataType::Boolean => (
                vec![slice_bitmap(&self.buffers[0], self.offset, self.len)],
                vec![],
                None,
            ),
            DataType::Dictionary(index_type, ..) => {
                let width = index_type.byte_width();
                let indices = self
                    .buffers[0]
                    .slice(self.offset * width..(self.offset + self.len) * width);
                let values = self
                    .dictionary
                    .as_ref()
                    .map(|d| Box::new(d.compact()));
                (vec![indices], vec![], values)
            }
            DataType::Utf8 | DataType::Binary => {
                (self.compact_varlen::<i32>(), vec![], None)
            }
            DataType::LargeUtf8 | DataType::LargeBinary => {
                (self.compact_varlen::<i64>(), vec![], None)
            }
            DataType::List(_) | DataType::Map(..) => {
                let (buffers, child) = self.compact_list::<i32>();
                (buffers, vec![child], None)
            }
            DataType::LargeList(_) => {
                let (buffers, child) = self.compact_list::<i64>();
                (buffers, vec![child], None)
            }
            DataType::FixedSizeList(_, size) => (
                vec![],
                vec![
                    self.children[0]
                        .slice(self.offset * size, self.len * size)
                        .compact(),
                ],
                None,
            ),
            DataType::Struct(_) => (
                vec![],
                self.children
                    .iter()
                    .map(|c| c.slice(self.offset, self.len).compact())
                    .collect(),
                None,
            ),
            DataType::Union(_, _, UnionMode::Sparse) => (
                vec![values_buffer(&read_values::<i8>(
                    &self.buffers[0],
                    self.offset,
                    self.len,
                ))],
                self.children
                    .iter()
                    .map(|c| c.slice(self.offset, self.len).compact())
                    .collect(),
                None,
            ),
            DataType::Union(fields, ids, UnionMode::Dense) => {
                self.compact_dense_union(fields.len(), ids.as_deref())
            }
            // Fixed-width primitives.
            other => {
                let width = other
                    .fixed_byte_width()
                    .unwrap_or_else(|| unreachable!("non-fixed type {other:?} not handled"));
                (
                    vec![
                        self.buffers[0]
                            .slice(self.offset * width..(self.offset + self.len) * width),
                    ],
                    vec![],
                    None,
                )
            }
        };

        ArrayData {
            data_type: self.data_type.clone(),
            len: self.len,
            offset: 0,
            null_count: self.null_count,
            validity,
            buffers,
            children,
            dictionary,
        }
    }

    fn offsets_window<O: Offset>(&self) -> Vec<O> {
        let width = size_of::<O>();
        if self.buffers[0].len() < (self.offset + self.len + 1) * width {
            // A zero-length array is allowed an absent offsets buffer.
            return vec![O::from_usize(0); self.len + 1];
        }
        read_values(&self.buffers[0], self.offset, self.len + 1)
    }

    fn compact_varlen<O: Offset>(&self) -> Vec<Bytes> {
        let offsets = self.offsets_window::<O>();
        let first = offsets[0].to_usize();
        let last = offsets[self.len].to_usize();
        let rebased: Vec<O> = offsets
            .iter()
            .map(|o| O::from_usize(o.to_usize() - first))
            .collect();
        vec![
            values_buffer(&rebased),
            self.buffers[1].slice(first..last),
        ]
    }

    fn compact_list<O: Offset>(&self) -> (Vec<Bytes>, ArrayData) {
        let offsets = self.offsets_window::<O>();
        let first = offsets[0].to_usize();
        let last = offsets[self.len].to_usize();
        let rebased: Vec<O> = offsets
            .iter()
            .map(|o| O::from_usize(o.to_usize() - first))
            .collect();
        let child = self.children[0].slice(first, last - first).compact();
        (vec![values_buffer(&rebased)], child)
    }

    fn compact_dense_union(
        &self,
        num_children: usize,
        declared_ids: Option<&[i32]>,
    ) -> (Vec<Bytes>, Vec<ArrayData>, Option<Box<ArrayData>>) {
        let type_ids = read_values::<i8>(&self.buffers[0], self.offset, self.len);
        let offsets = read_values::<i32>(&self.buffers[1], self.offset, self.len);

        // Children only need their referenced prefix: the offsets in the
        // window stay valid as long as each child keeps [0, max_offset].
        let mut max_ref: Vec<Option<usize>> = vec![None; num_children];
        for (tid, child_offset) in type_ids.iter().zip(offsets.iter()) {
            let child = declared_ids
                .and_then(|ids| ids.iter().position(|id| *id == *tid as i32))
                .unwrap_or(*tid as usize);
            let end = *child_offset as usize;
            max_ref[child] = Some(max_ref[child].map_or(end, |m: usize| m.max(end)));
        }

        let children = self
            .children
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let keep = max_ref[i].map(|m| m + 1).unwrap_or(0);
                c.slice(0, keep).compact()
            })
            .collect();

        (
            vec![values_buffer(&type_ids), values_buffer(&offsets)],
            children,
            None,
        )
    }

    fn eq_compacted(&self, other: &ArrayData) -> bool {
        self.data_type == other.data_type
            && self.len == other.len
            && self.null_count == other.null_count
            && self.validity == other.validity
            && self.buffers == other.buffers
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(other.children.iter())
                .all(|(a, b)| a.eq_compacted(b))
            && match (&self.dictionary, &other.dictionary) {
                (None, None) => true,
                (Some(a), Some(b)) => a.eq_compacted(b),
                _ => false,
            }
    }
}

/// Structural equality over logical contents: two views over different
/// physical buffers are equal when their compacted forms are byte-equal.
impl PartialEq for ArrayData {
    fn eq(&self, other: &Self) -> bool {
        self.data_type == other.data_type
            && self.len == other.len
            && self.null_count == other.null_count
            && self.compact().eq_compacted(&other.compact())
    }
}

impl Eq for ArrayData {}
