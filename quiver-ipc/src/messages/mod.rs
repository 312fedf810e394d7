//! Message framing: the `[continuation][length][metadata][padding][body]`
//! envelope, a sequential reader over it, and an incremental decoder that
//! makes progress on arbitrarily chunked input.

mod decoder;
pub(crate) mod encoder;
pub(crate) mod reader;

pub use decoder::*;
pub use encoder::*;
pub use reader::*;

use bytes::Bytes;
use quiver_error::QuiverResult;
use quiver_schema::Metadata;

use crate::convert::{self, MessageKind};
use crate::options::MetadataVersion;

/// The 4-byte marker prefixing every non-legacy message.
pub const CONTINUATION_MARKER: u32 = 0xFFFF_FFFF;

/// A framed message, decoded as far as its envelope.
///
/// Owns its bytes; equality is structural over the metadata and body
/// buffers, never identity.
#[derive(Debug, Clone)]
pub struct Message {
    kind: MessageKind,
    version: MetadataVersion,
    metadata: Bytes,
    body: Bytes,
}

impl Message {
    /// Wrap already-parsed metadata and its body.
    pub fn try_new(metadata: Bytes, body: Bytes) -> QuiverResult<Self> {
        let parts = convert::message_parts(&metadata)?;
        Ok(Self {
            kind: parts.kind,
            version: parts.version,
            metadata,
            body,
        })
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn version(&self) -> MetadataVersion {
        self.version
    }

    /// The metadata flatbuffer, padding included.
    pub fn metadata(&self) -> &Bytes {
        &self.metadata
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_length(&self) -> i64 {
        self.body.len() as i64
    }

    /// Message-level custom metadata; absent and empty are distinct.
    pub fn custom_metadata(&self) -> QuiverResult<Option<Metadata>> {
        convert::message_custom_metadata(&self.metadata)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata && self.body == other.body
    }
}

impl Eq for Message {}
