//! Assembly of wire-ready payloads from schemas, dictionaries and record
//! batches, and the single framing choke point all writers share.

use std::io::Write;

use bytes::Bytes;
use quiver_array::{ArrayData, RecordBatch};
use quiver_error::QuiverResult;
use quiver_schema::Schema;

use crate::convert::{self, MessageKind, RecordBatchHeader};
use crate::dictionary::DictionaryFieldMapper;
use crate::layout::{self, EncodedBody};
use crate::messages::{self, Message};
use crate::options::IpcWriteOptions;

/// A message ready for framing: metadata plus an ordered list of body
/// buffers. Ephemeral; produced and consumed per message.
#[derive(Debug, Clone)]
pub struct IpcPayload {
    pub kind: MessageKind,
    pub metadata: Bytes,
    pub body: Vec<Bytes>,
    pub body_length: i64,
}

impl IpcPayload {
    /// Re-frame a raw message, e.g. when splicing streams.
    pub fn from_message(message: &Message) -> IpcPayload {
        IpcPayload {
            kind: message.kind(),
            metadata: message.metadata().clone(),
            body: vec![message.body().clone()],
            body_length: message.body_length(),
        }
    }
}

/// The schema message that opens every stream.
pub fn schema_payload(
    schema: &Schema,
    mapper: &DictionaryFieldMapper,
    options: &IpcWriteOptions,
) -> QuiverResult<IpcPayload> {
    let metadata = convert::schema_message_bytes(schema, mapper, options.metadata_version)?;
    Ok(IpcPayload {
        kind: MessageKind::Schema,
        metadata,
        body: vec![],
        body_length: 0,
    })
}

fn encode_body(columns: &[ArrayData], options: &IpcWriteOptions) -> QuiverResult<EncodedBody> {
    let compacted: Vec<ArrayData> = columns.iter().map(ArrayData::compact).collect();
    layout::encode_columns(
        &compacted,
        options.max_recursion_depth,
        options.alignment,
        options.compression,
        options.use_threads,
    )
}

fn batch_header(length: i64, body: &EncodedBody, options: &IpcWriteOptions) -> RecordBatchHeader {
    RecordBatchHeader {
        length,
        nodes: body.nodes.clone(),
        buffers: body.buffers.clone(),
        compression: options.compression,
    }
}

/// Flatten a record batch into a payload.
pub fn record_batch_payload(
    batch: &RecordBatch,
    options: &IpcWriteOptions,
) -> QuiverResult<IpcPayload> {
    let body = encode_body(batch.columns(), options)?;
    let header = batch_header(batch.num_rows() as i64, &body, options);
    let metadata = convert::record_batch_message_bytes(
        &header,
        body.body_length,
        options.metadata_version,
        None,
    );
    Ok(IpcPayload {
        kind: MessageKind::RecordBatch,
        metadata,
        body: body.parts,
        body_length: body.body_length,
    })
}

/// Wrap one dictionary's values as a dictionary batch payload.
pub fn dictionary_payload(
    id: i64,
    is_delta: bool,
    values: &ArrayData,
    options: &IpcWriteOptions,
) -> QuiverResult<IpcPayload> {
    let columns = [values.clone()];
    let body = encode_body(&columns, options)?;
    let header = batch_header(values.len() as i64, &body, options);
    let metadata = convert::dictionary_batch_message_bytes(
        id,
        is_delta,
        &header,
        body.body_length,
        options.metadata_version,
    );
    Ok(IpcPayload {
        kind: MessageKind::DictionaryBatch,
        metadata,
        body: body.parts,
        body_length: body.body_length,
    })
}

/// Frame a payload onto `sink`. Returns the metadata segment length
/// (prefix and padding included), the value a file footer block records.
pub fn write_ipc_payload<W: Write>(
    payload: &IpcPayload,
    options: &IpcWriteOptions,
    sink: &mut W,
) -> QuiverResult<u32> {
    messages::encoder::write_message(
        sink,
        &payload.metadata,
        &payload.body,
        options.alignment,
        options.write_legacy_format,
    )
}

/// The framed size of a record batch under `options`: metadata segment
/// plus body. A sliced batch must measure strictly smaller than its parent.
pub fn get_record_batch_size(
    batch: &RecordBatch,
    options: &IpcWriteOptions,
) -> QuiverResult<usize> {
    let payload = record_batch_payload(batch, options)?;
    let prefix = if options.write_legacy_format { 4 } else { 8 };
    let metadata_segment = (prefix + payload.metadata.len()).next_multiple_of(options.alignment);
    Ok(metadata_segment + payload.body_length as usize)
}
