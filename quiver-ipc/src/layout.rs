//! The buffer layout engine: maps a (compacted) column tree to the flat,
//! offset-addressed node/buffer lists of the wire format, and back.
//!
//! Both directions walk the type tree pre-order and track recursion depth
//! against a configured limit, so a hostile or degenerate schema fails with
//! an error instead of exhausting the call stack.

use bytes::Bytes;
use quiver_array::ArrayData;
use quiver_error::{QuiverResult, quiver_bail, quiver_err};
use quiver_schema::{DataType, UnionMode};

use crate::compression::{self, CompressionKind};
use crate::convert::{BufferDesc, FieldNode, RecordBatchHeader};
use crate::dictionary::{DictionaryFieldMapper, DictionaryMemo, FieldPosition};

static PADDING: [u8; 512] = [0; 512];

/// A flattened, wire-ready message body.
#[derive(Debug)]
pub(crate) struct EncodedBody {
    pub nodes: Vec<FieldNode>,
    pub buffers: Vec<BufferDesc>,
    /// Data and padding runs, to be written back to back.
    pub parts: Vec<Bytes>,
    pub body_length: i64,
}

struct BodyBuilder {
    buffers: Vec<BufferDesc>,
    parts: Vec<Bytes>,
    offset: i64,
    alignment: usize,
}

impl BodyBuilder {
    fn push(&mut self, bytes: Bytes) {
        let length = bytes.len() as i64;
        self.buffers.push(BufferDesc {
            offset: self.offset,
            length,
        });
        let padded = (bytes.len()).next_multiple_of(self.alignment);
        let padding = padded - bytes.len();
        if !bytes.is_empty() {
            self.parts.push(bytes);
        }
        if padding > 0 {
            self.parts.push(Bytes::from_static(&PADDING[..padding]));
        }
        self.offset += padded as i64;
    }
}

/// Flatten `columns` (each already compacted) into nodes, buffer
/// descriptors and body parts, compressing buffers when requested.
pub(crate) fn encode_columns(
    columns: &[ArrayData],
    max_recursion_depth: usize,
    alignment: usize,
    compression: Option<CompressionKind>,
    use_threads: bool,
) -> QuiverResult<EncodedBody> {
    let mut nodes = Vec::new();
    let mut raw = Vec::new();
    for column in columns {
        append_array(column, &mut nodes, &mut raw, 0, max_recursion_depth)?;
    }

    let raw = match compression {
        None => raw,
        Some(kind) => {
            if use_threads {
                use rayon::prelude::*;
                raw.par_iter()
                    .map(|bytes| compression::compress_buffer(kind, bytes))
                    .collect::<QuiverResult<Vec<_>>>()?
            } else {
                raw.iter()
                    .map(|bytes| compression::compress_buffer(kind, bytes))
                    .collect::<QuiverResult<Vec<_>>>()?
            }
        }
    };

    let mut builder = BodyBuilder {
        buffers: Vec::with_capacity(raw.len()),
        parts: Vec::new(),
        offset: 0,
        alignment,
    };
    for bytes in raw {
        builder.push(bytes);
    }

    Ok(EncodedBody {
        nodes,
        buffers: builder.buffers,
        parts: builder.parts,
        body_length: builder.offset,
    })
}

fn append_array(
    array: &ArrayData,
    nodes: &mut Vec<FieldNode>,
    raw: &mut Vec<Bytes>,
    depth: usize,
    max_depth: usize,
) -> QuiverResult<()> {
    if depth >= max_depth {
        quiver_bail!("max recursion depth ({}) reached while flattening a batch", max_depth);
    }

    nodes.push(FieldNode {
        length: array.len() as i64,
        null_count: array.null_count() as i64,
    });

    let validity = || {
        if array.null_count() > 0 {
            array.validity().cloned().unwrap_or_default()
        } else {
            Bytes::new()
        }
    };

    match array.data_type().storage_type() {
        DataType::Null => {}
        DataType::Boolean | DataType::Dictionary(..) => {
            raw.push(validity());
            raw.push(array.buffers()[0].clone());
        }
        DataType::Utf8 | DataType::Binary | DataType::LargeUtf8 | DataType::LargeBinary => {
            raw.push(validity());
            raw.push(array.buffers()[0].clone());
            raw.push(array.buffers()[1].clone());
        }
        DataType::List(_) | DataType::LargeList(_) | DataType::Map(..) => {
            raw.push(validity());
            raw.push(array.buffers()[0].clone());
            append_array(&array.children()[0], nodes, raw, depth + 1, max_depth)?;
        }
        DataType::FixedSizeList(..) => {
            raw.push(validity());
            append_array(&array.children()[0], nodes, raw, depth + 1, max_depth)?;
        }
        DataType::Struct(_) => {
            raw.push(validity());
            for child in array.children() {
                append_array(child, nodes, raw, depth + 1, max_depth)?;
            }
        }
        DataType::Union(_, _, mode) => {
            raw.push(array.buffers()[0].clone());
            if !mode.is_sparse() {
                raw.push(array.buffers()[1].clone());
            }
            for child in array.children() {
                append_array(child, nodes, raw, depth + 1, max_depth)?;
            }
        }
        // Fixed-width primitives.
        _ => {
            raw.push(validity());
            raw.push(array.buffers()[0].clone());
        }
    }
    Ok(())
}

/// The node/buffer footprint of one field's subtree in a record batch.
/// Dictionary-encoded fields contribute only their index column.
pub fn subtree_counts(data_type: &DataType) -> (usize, usize) {
    let storage = data_type.storage_type();
    let (mut nodes, mut buffers) = match storage {
        DataType::Null => (1, 0),
        DataType::Boolean | DataType::Dictionary(..) => (1, 2),
        DataType::Utf8 | DataType::Binary | DataType::LargeUtf8 | DataType::LargeBinary => (1, 3),
        DataType::List(_) | DataType::LargeList(_) | DataType::Map(..) => (1, 2),
        DataType::FixedSizeList(..) | DataType::Struct(_) => (1, 1),
        DataType::Union(_, _, UnionMode::Sparse) => (1, 1),
        DataType::Union(_, _, UnionMode::Dense) => (1, 2),
        _ => (1, 2),
    };
    if !matches!(storage, DataType::Dictionary(..)) {
        for child in storage.children() {
            let (n, b) = subtree_counts(&child.data_type);
            nodes += n;
            buffers += b;
        }
    }
    (nodes, buffers)
}

/// Resolves buffer descriptors to their bytes during reconstruction.
pub trait BodySource {
    /// The bytes of the buffer at pre-order index `index`, decompressed.
    /// Zero-length buffers resolve without I/O.
    fn buffer(&self, index: usize, desc: &BufferDesc) -> QuiverResult<Bytes>;
}

/// A body held contiguously in memory (stream reads, full-body file reads).
pub struct ContiguousBody {
    pub body: Bytes,
    pub compression: Option<CompressionKind>,
}

impl BodySource for ContiguousBody {
    fn buffer(&self, _index: usize, desc: &BufferDesc) -> QuiverResult<Bytes> {
        read_buffer_slice(&self.body, desc, self.compression)
    }
}

fn read_buffer_slice(
    body: &Bytes,
    desc: &BufferDesc,
    compression: Option<CompressionKind>,
) -> QuiverResult<Bytes> {
    if desc.length == 0 {
        return Ok(Bytes::new());
    }
    let start = usize::try_from(desc.offset)
        .map_err(|_| quiver_err!(InvalidSerde: "negative buffer offset {}", desc.offset))?;
    let length = usize::try_from(desc.length)
        .map_err(|_| quiver_err!(InvalidSerde: "negative buffer length {}", desc.length))?;
    if start + length > body.len() {
        quiver_bail!(
            InvalidSerde: "buffer [{}, {}) lies beyond the {}-byte message body",
            start,
            start + length,
            body.len()
        );
    }
    let bytes = body.slice(start..start + length);
    match compression {
        None => Ok(bytes),
        Some(kind) => compression::decompress_buffer(kind, &bytes),
    }
}

/// Per-buffer preloaded bytes (projected file reads).
pub struct PreloadedBody {
    pub buffers: Vec<Option<Bytes>>,
    pub compression: Option<CompressionKind>,
}

impl BodySource for PreloadedBody {
    fn buffer(&self, index: usize, desc: &BufferDesc) -> QuiverResult<Bytes> {
        if desc.length == 0 {
            return Ok(Bytes::new());
        }
        let bytes = self
            .buffers
            .get(index)
            .and_then(Clone::clone)
            .ok_or_else(|| quiver_err!("buffer {} was not loaded", index))?;
        match self.compression {
            None => Ok(bytes),
            Some(kind) => compression::decompress_buffer(kind, &bytes),
        }
    }
}

/// Cursor state shared across one reconstruction walk.
pub struct ArrayLoader<'a> {
    pub header: &'a RecordBatchHeader,
    pub source: &'a dyn BodySource,
    pub mapper: &'a DictionaryFieldMapper,
    pub memo: &'a DictionaryMemo,
    pub max_recursion_depth: usize,
    pub node_index: usize,
    pub buffer_index: usize,
}

impl<'a> ArrayLoader<'a> {
    pub fn new(
        header: &'a RecordBatchHeader,
        source: &'a dyn BodySource,
        mapper: &'a DictionaryFieldMapper,
        memo: &'a DictionaryMemo,
        max_recursion_depth: usize,
    ) -> Self {
        Self {
            header,
            source,
            mapper,
            memo,
            max_recursion_depth,
            node_index: 0,
            buffer_index: 0,
        }
    }

    fn next_node(&mut self) -> QuiverResult<FieldNode> {
        let node = self
            .header
            .nodes
            .get(self.node_index)
            .copied()
            .ok_or_else(|| quiver_err!(InvalidSerde: "record batch metadata has too few field nodes"))?;
        self.node_index += 1;
        Ok(node)
    }

    fn next_buffer(&mut self) -> QuiverResult<Bytes> {
        let index = self.buffer_index;
        let desc = self
            .header
            .buffers
            .get(index)
            .ok_or_else(|| quiver_err!(InvalidSerde: "record batch metadata has too few buffers"))?;
        self.buffer_index += 1;
        self.source.buffer(index, desc)
    }

    /// Consume a buffer slot without touching its bytes.
    fn skip_buffer(&mut self) -> QuiverResult<()> {
        if self.buffer_index >= self.header.buffers.len() {
            quiver_bail!(InvalidSerde: "record batch metadata has too few buffers");
        }
        self.buffer_index += 1;
        Ok(())
    }

    /// Skip a whole field subtree (projection).
    pub fn skip_field(&mut self, data_type: &DataType) -> QuiverResult<()> {
        let (nodes, buffers) = subtree_counts(data_type);
        self.node_index += nodes;
        self.buffer_index += buffers;
        if self.node_index > self.header.nodes.len()
            || self.buffer_index > self.header.buffers.len()
        {
            quiver_bail!(InvalidSerde: "record batch metadata ended inside a skipped field");
        }
        Ok(())
    }

    pub fn load_field(
        &mut self,
        data_type: &DataType,
        pos: &FieldPosition,
    ) -> QuiverResult<ArrayData> {
        self.load_array(data_type, pos, 0)
    }

    fn load_array(
        &mut self,
        data_type: &DataType,
        pos: &FieldPosition,
        depth: usize,
    ) -> QuiverResult<ArrayData> {
        if depth >= self.max_recursion_depth {
            quiver_bail!(
                "max recursion depth ({}) reached while reading a batch",
                self.max_recursion_depth
            );
        }

        let node = self.next_node()?;
        let len = usize::try_from(node.length)
            .map_err(|_| quiver_err!(InvalidSerde: "negative field node length {}", node.length))?;
        let null_count = usize::try_from(node.null_count).map_err(|_| {
            quiver_err!(InvalidSerde: "negative field node null count {}", node.null_count)
        })?;

        let storage = data_type.storage_type();

        // Unions carry no validity slot; everything else spends one.
        let validity = match storage {
            DataType::Null | DataType::Union(..) => None,
            _ => {
                if null_count > 0 {
                    Some(self.next_buffer()?)
                } else {
                    self.skip_buffer()?;
                    None
                }
            }
        };

        let (buffers, children, dictionary) = match storage {
            DataType::Null => (vec![], vec![], None),
            DataType::Boolean => (vec![self.next_buffer()?], vec![], None),
            DataType::Utf8 | DataType::Binary | DataType::LargeUtf8 | DataType::LargeBinary => (
                vec![self.next_buffer()?, self.next_buffer()?],
                vec![],
                None,
            ),
            DataType::List(_) | DataType::LargeList(_) | DataType::Map(..) => {
                let offsets = self.next_buffer()?;
                let child_type = storage.children()[0].data_type.clone();
                let child = self.load_array(&child_type, &pos.child(0), depth + 1)?;
                (vec![offsets], vec![child], None)
            }
            DataType::FixedSizeList(..) => {
                let child_type = storage.children()[0].data_type.clone();
                let child = self.load_array(&child_type, &pos.child(0), depth + 1)?;
                (vec![], vec![child], None)
            }
            DataType::Struct(_) => {
                let child_types: Vec<DataType> = storage
                    .children()
                    .iter()
                    .map(|f| f.data_type.clone())
                    .collect();
                let mut children = Vec::with_capacity(child_types.len());
                for (i, child_type) in child_types.iter().enumerate() {
                    children.push(self.load_array(child_type, &pos.child(i), depth + 1)?);
                }
                (vec![], children, None)
            }
            DataType::Union(fields, _, mode) => {
                let mut buffers = vec![self.next_buffer()?];
                if !mode.is_sparse() {
                    buffers.push(self.next_buffer()?);
                }
                let child_types: Vec<DataType> =
                    fields.iter().map(|f| f.data_type.clone()).collect();
                let mut children = Vec::with_capacity(child_types.len());
                for (i, child_type) in child_types.iter().enumerate() {
                    children.push(self.load_array(child_type, &pos.child(i), depth + 1)?);
                }
                (buffers, children, None)
            }
            DataType::Dictionary(..) => {
                let indices = self.next_buffer()?;
                let id = self.mapper.get_field_id(pos.path())?;
                let values = self.memo.dictionary(id)?.clone();
                (vec![indices], vec![], Some(values))
            }
            // Fixed-width primitives.
            _ => (vec![self.next_buffer()?], vec![], None),
        };

        let array = ArrayData::try_new(
            data_type.clone(),
            len,
            validity,
            buffers,
            children,
            dictionary,
        )?;
        if array.null_count() != null_count && !matches!(storage, DataType::Null) {
            quiver_bail!(
                InvalidSerde: "validity bitmap disagrees with the declared null count ({} vs {})",
                array.null_count(),
                null_count
            );
        }
        Ok(array)
    }
}

/// Decode the columns of a record batch, honoring an optional sorted
/// projection of top-level field indices.
pub fn decode_columns(
    header: &RecordBatchHeader,
    source: &dyn BodySource,
    schema: &quiver_schema::Schema,
    mapper: &DictionaryFieldMapper,
    memo: &DictionaryMemo,
    projection: Option<&[usize]>,
    max_recursion_depth: usize,
) -> QuiverResult<Vec<ArrayData>> {
    let mut loader = ArrayLoader::new(header, source, mapper, memo, max_recursion_depth);
    let root = FieldPosition::new();
    let mut columns = Vec::new();
    for (i, field) in schema.fields.iter().enumerate() {
        let selected = projection.map(|p| p.contains(&i)).unwrap_or(true);
        if selected {
            columns.push(loader.load_field(&field.data_type, &root.child(i))?);
        } else {
            loader.skip_field(&field.data_type)?;
        }
    }
    Ok(columns)
}

/// Decode a dictionary batch's values (a single column of the registered
/// value type) and fold them into the memo.
pub fn load_dictionary_batch(
    header: &crate::convert::DictionaryBatchHeader,
    source: &dyn BodySource,
    mapper: &DictionaryFieldMapper,
    memo: &mut DictionaryMemo,
    max_recursion_depth: usize,
) -> QuiverResult<crate::dictionary::DictionaryUpdate> {
    let value_type = memo.dictionary_type(header.id)?.clone();
    // Nested dictionaries inside the values resolve by id through the same
    // memo; path context comes from any field mapped to this id.
    let pos = mapper
        .path_for_id(header.id)
        .map(|path| FieldPosition::from_path(path.to_vec()))
        .unwrap_or_default();
    let mut loader = ArrayLoader::new(&header.data, source, mapper, memo, max_recursion_depth);
    let values = loader.load_field(&value_type, &pos)?;
    memo.add_dictionary(header.id, values, header.is_delta)
}
