//! Byte source abstractions for Quiver readers.
//!
//! Streaming paths use `std::io::{Read, Write}` directly; random access
//! goes through [`ReadAt`] / [`AsyncReadAt`] so one source can serve many
//! outstanding positional reads. [`read_byte_ranges`] coalesces neighboring
//! requests, and [`InstrumentedReadAt`] makes a reader's physical I/O
//! pattern observable.

mod instrument;
mod ranges;
mod read;

pub use instrument::*;
pub use ranges::*;
pub use read::*;
