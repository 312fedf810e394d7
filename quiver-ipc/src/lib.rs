//! Quiver IPC: a length-prefixed message protocol for typed, nested,
//! nullable columnar record batches.
//!
//! A stream is a schema message followed by dictionary and record batch
//! messages, each framed as `[continuation][length][metadata][padding]
//! [body]`. Dictionary-encoded columns ship their values separately,
//! keyed by ids assigned per field path; dictionaries may be replaced or
//! extended (deltas) between batches. The `quiver-file` crate layers the
//! random-access file container on top of these messages.

pub mod compression;
pub mod convert;
pub mod dictionary;
pub mod layout;
pub mod messages;
mod options;
mod payload;
mod reader;
mod stats;
mod stream_decoder;
mod writer;

pub use compression::CompressionKind;
pub use dictionary::{DictionaryFieldMapper, DictionaryMemo, DictionaryUpdate, FieldPosition};
pub use messages::{CONTINUATION_MARKER, Message, MessageDecoder, MessageReader, PollDecode};
pub use options::*;
pub use payload::*;
pub use reader::*;
pub use stats::*;
pub use stream_decoder::*;
pub use writer::*;
