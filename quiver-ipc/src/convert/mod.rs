//! The metadata codec: logical schemas, batch headers and message roots to
//! and from the compact self-describing flatbuffer representation.

mod read;
mod write;

pub use read::*;
pub use write::*;

use crate::compression::CompressionKind;
use crate::options::MetadataVersion;

/// One `(length, null_count)` entry per flattened field occurrence, in
/// pre-order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldNode {
    pub length: i64,
    pub null_count: i64,
}

/// One `(offset, length)` entry per physical buffer, in the same pre-order.
/// Offsets address the message body; lengths exclude padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub offset: i64,
    pub length: i64,
}

/// The decoded header of a record batch message.
#[derive(Debug, Clone)]
pub struct RecordBatchHeader {
    pub length: i64,
    pub nodes: Vec<FieldNode>,
    pub buffers: Vec<BufferDesc>,
    pub compression: Option<CompressionKind>,
}

/// The decoded header of a dictionary batch message: the dictionary values
/// travel as a single-column record batch.
#[derive(Debug, Clone)]
pub struct DictionaryBatchHeader {
    pub id: i64,
    pub is_delta: bool,
    pub data: RecordBatchHeader,
}

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Schema,
    RecordBatch,
    DictionaryBatch,
}

/// The envelope-independent parts parsed from message metadata.
#[derive(Debug, Clone, Copy)]
pub struct MessageParts {
    pub kind: MessageKind,
    pub version: MetadataVersion,
    pub body_length: i64,
}

/// Field metadata keys carrying extension type information.
pub(crate) const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";
pub(crate) const EXTENSION_METADATA_KEY: &str = "ARROW:extension:metadata";
