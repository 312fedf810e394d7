//! Stream writing: schema first, then per batch any new or changed
//! dictionary messages followed by the record batch itself.

use std::collections::HashMap;
use std::io::Write;

use bytes::Bytes;
use quiver_array::{ArrayData, RecordBatch, SchemaRef};
use quiver_error::{QuiverResult, quiver_bail, quiver_err};
use quiver_schema::DataType;

use crate::dictionary::{
    DictionaryEmission, DictionaryFieldMapper, DictionaryTracker, collect_dictionaries,
};
use crate::messages::encoder;
use crate::options::IpcWriteOptions;
use crate::payload::{
    self, IpcPayload, dictionary_payload, record_batch_payload, schema_payload,
};
use crate::stats::WriteStats;

/// Where a framed payload landed on the sink; file writers record these as
/// footer blocks.
#[derive(Debug, Clone, Copy)]
pub struct PayloadLocation {
    pub offset: u64,
    pub metadata_length: u32,
    pub body_length: i64,
}

/// A position-tracking framing sink shared by the stream and file writers.
#[derive(Debug)]
pub struct IpcPayloadWriter<W> {
    sink: W,
    pos: u64,
    options: IpcWriteOptions,
}

impl<W: Write> IpcPayloadWriter<W> {
    pub fn new(sink: W, options: IpcWriteOptions) -> Self {
        Self {
            sink,
            pos: 0,
            options,
        }
    }

    pub fn options(&self) -> &IpcWriteOptions {
        &self.options
    }

    /// The current position, counted from where this writer started.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn write_payload(&mut self, payload: &IpcPayload) -> QuiverResult<PayloadLocation> {
        let offset = self.pos;
        let metadata_length = payload::write_ipc_payload(payload, &self.options, &mut self.sink)?;
        self.pos += metadata_length as u64 + payload.body_length as u64;
        Ok(PayloadLocation {
            offset,
            metadata_length,
            body_length: payload.body_length,
        })
    }

    pub fn write_eos(&mut self) -> QuiverResult<()> {
        let written = encoder::write_eos(&mut self.sink, self.options.write_legacy_format)?;
        self.pos += written as u64;
        Ok(())
    }

    /// Raw bytes outside the message framing (file magic, footers).
    pub fn write_raw(&mut self, bytes: &[u8]) -> QuiverResult<()> {
        self.sink.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// The dictionary half of a write session: plans emissions through a
/// [`DictionaryTracker`] and keeps the counters in sync. Shared by the
/// stream and file writers.
#[derive(Debug)]
pub struct DictionaryWriter {
    mapper: DictionaryFieldMapper,
    tracker: DictionaryTracker,
}

impl DictionaryWriter {
    pub fn new(mapper: DictionaryFieldMapper, options: &IpcWriteOptions, is_file: bool) -> Self {
        Self {
            mapper,
            tracker: DictionaryTracker::new(options.emit_dictionary_deltas, is_file),
        }
    }

    pub fn mapper(&self) -> &DictionaryFieldMapper {
        &self.mapper
    }

    /// Emit whatever dictionary messages `batch` requires, in dependency
    /// order, before the batch itself is written.
    pub fn write_batch_dictionaries<W: Write>(
        &mut self,
        batch: &RecordBatch,
        writer: &mut IpcPayloadWriter<W>,
        stats: &mut WriteStats,
    ) -> QuiverResult<Vec<PayloadLocation>> {
        let mut locations = Vec::new();
        for (id, values) in collect_dictionaries(batch, &self.mapper)? {
            let (payload, replacement, delta) = match self.tracker.plan(id, &values)? {
                DictionaryEmission::Skip => continue,
                DictionaryEmission::Full {
                    replacement,
                    values,
                } => (
                    dictionary_payload(id, false, &values, writer.options())?,
                    replacement,
                    false,
                ),
                DictionaryEmission::Delta { values } => (
                    dictionary_payload(id, true, &values, writer.options())?,
                    false,
                    true,
                ),
            };
            log::debug!(
                "writing dictionary {} (replacement: {}, delta: {})",
                id,
                replacement,
                delta
            );
            locations.push(writer.write_payload(&payload)?);
            stats.num_messages += 1;
            stats.num_dictionary_batches += 1;
            if replacement {
                stats.num_replaced_dictionaries += 1;
            }
            if delta {
                stats.num_dictionary_deltas += 1;
            }
        }
        Ok(locations)
    }
}

/// Writes the continuous stream format.
pub struct StreamWriter<W: Write> {
    writer: IpcPayloadWriter<W>,
    schema: SchemaRef,
    dictionaries: DictionaryWriter,
    stats: WriteStats,
    finished: bool,
}

impl<W: Write> StreamWriter<W> {
    /// Open a stream for `schema`, writing the schema message immediately.
    pub fn try_new(sink: W, schema: SchemaRef, options: IpcWriteOptions) -> QuiverResult<Self> {
        let mapper = DictionaryFieldMapper::from_schema(&schema);
        let mut writer = IpcPayloadWriter::new(sink, options);
        let payload = schema_payload(&schema, &mapper, writer.options())?;
        writer.write_payload(&payload)?;
        let dictionaries = DictionaryWriter::new(mapper, writer.options(), false);
        Ok(Self {
            writer,
            schema,
            dictionaries,
            stats: WriteStats {
                num_messages: 1,
                ..WriteStats::default()
            },
            finished: false,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> QuiverResult<()> {
        if self.finished {
            quiver_bail!("stream writer is already finished");
        }
        check_batch_schema(&self.schema, batch)?;
        self.dictionaries
            .write_batch_dictionaries(batch, &mut self.writer, &mut self.stats)?;
        let payload = record_batch_payload(batch, self.writer.options())?;
        self.writer.write_payload(&payload)?;
        self.stats.num_messages += 1;
        self.stats.num_record_batches += 1;
        Ok(())
    }

    /// Write a sequence of batches; with `unify_dictionaries` set, one
    /// canonical dictionary per field is computed up front and all indices
    /// are rewritten against it.
    pub fn write_table(&mut self, batches: &[RecordBatch]) -> QuiverResult<()> {
        let batches = if self.writer.options().unify_dictionaries {
            unify_table_dictionaries(batches, self.dictionaries.mapper())?
        } else {
            batches.to_vec()
        };
        for batch in &batches {
            self.write_batch(batch)?;
        }
        Ok(())
    }

    /// Terminate the stream with an end-of-stream marker.
    pub fn finish(&mut self) -> QuiverResult<()> {
        if !self.finished {
            self.writer.write_eos()?;
            self.finished = true;
        }
        Ok(())
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Reject batches whose schema differs from the writer's in anything but
/// metadata.
pub fn check_batch_schema(schema: &SchemaRef, batch: &RecordBatch) -> QuiverResult<()> {
    if !schema.equals_ignoring_metadata(batch.schema()) {
        quiver_bail!(
            "tried to write a batch with a schema different from the writer's"
        );
    }
    Ok(())
}

/// Rewrite `batches` so every dictionary field uses one unified dictionary
/// across the whole table. Only top-level flat dictionary columns
/// participate; dictionaries nested inside other dictionary-encoded or
/// container types fail `NotImplemented`.
pub fn unify_table_dictionaries(
    batches: &[RecordBatch],
    mapper: &DictionaryFieldMapper,
) -> QuiverResult<Vec<RecordBatch>> {
    if batches.is_empty() {
        return Ok(vec![]);
    }

    // Columns are unified positionally; nested dictionaries have paths
    // longer than one and are out of scope.
    let schema = batches[0].schema().clone();
    for field in &schema.fields {
        if !field.data_type.is_dictionary()
            && crate::dictionary::type_contains_dictionary(&field.data_type)
        {
            quiver_bail!(
                NotImplemented: "unifying dictionaries nested inside {:?}",
                field.data_type
            );
        }
        if let DataType::Dictionary(_, values, _) = field.data_type.storage_type() {
            if crate::dictionary::type_contains_dictionary(values) {
                quiver_bail!(
                    NotImplemented: "unifying dictionaries nested inside dictionary value type {:?}",
                    values
                );
            }
        }
    }

    let mut unified: Vec<RecordBatch> = Vec::with_capacity(batches.len());
    let mut columns_per_batch: Vec<Vec<ArrayData>> =
        batches.iter().map(|b| b.columns().to_vec()).collect();

    for (col, field) in schema.fields.iter().enumerate() {
        let DataType::Dictionary(index_type, value_type, ordered) =
            field.data_type.storage_type().clone()
        else {
            continue;
        };
        let _ = mapper.get_field_id(&[col])?;

        // Gather every distinct element across all batches, first-seen
        // order, remembering each batch's old-index → new-index table.
        let mut elements: Vec<Option<Bytes>> = Vec::new();
        let mut positions: HashMap<Option<Bytes>, usize> = HashMap::new();
        let mut remaps: Vec<Vec<usize>> = Vec::with_capacity(batches.len());
        for batch in batches {
            let values = batch.column(col).dictionary().ok_or_else(|| {
                quiver_err!("dictionary column {} is missing its values", col)
            })?;
            let mut remap = Vec::with_capacity(values.len());
            for i in 0..values.len() {
                let element = values.element_bytes(i).ok_or_else(|| {
                    quiver_err!(
                        NotImplemented: "unifying dictionaries with value type {:?}",
                        values.data_type()
                    )
                })?;
                let next = elements.len();
                let position = *positions.entry(element.clone()).or_insert(next);
                if position == next {
                    elements.push(element);
                }
                remap.push(position);
            }
            remaps.push(remap);
        }

        let unified_values = ArrayData::try_from_elements(&value_type, &elements)?;
        for (batch_idx, columns) in columns_per_batch.iter_mut().enumerate() {
            columns[col] = remap_dictionary_column(
                &columns[col],
                index_type,
                &unified_values,
                ordered,
                &remaps[batch_idx],
            )?;
        }
    }

    for columns in columns_per_batch {
        unified.push(RecordBatch::try_new(schema.clone(), columns)?);
    }
    Ok(unified)
}

fn remap_dictionary_column(
    column: &ArrayData,
    index_type: quiver_schema::IntegerType,
    unified_values: &ArrayData,
    ordered: bool,
    remap: &[usize],
) -> QuiverResult<ArrayData> {
    let compact = column.compact();
    let width = index_type.byte_width();
    let indices = &compact.buffers()[0];
    let mut out = Vec::with_capacity(column.len() * width);
    for i in 0..column.len() {
        let new_index = if compact.is_valid(i) {
            let old = read_le_index(&indices[i * width..(i + 1) * width]);
            *remap.get(old).ok_or_else(|| {
                quiver_err!(InvalidSerde: "dictionary index {} out of range", old)
            })?
        } else {
            0
        };
        out.extend_from_slice(&new_index.to_le_bytes()[..width]);
    }

    let indices = ArrayData::try_new(
        index_type.into(),
        column.len(),
        compact.validity().cloned(),
        vec![Bytes::from(out)],
        vec![],
        None,
    )?;
    ArrayData::try_dictionary(indices, unified_values.clone(), ordered)
}

fn read_le_index(bytes: &[u8]) -> usize {
    let mut value = [0u8; 8];
    value[..bytes.len()].copy_from_slice(bytes);
    usize::from_le_bytes(value)
}
