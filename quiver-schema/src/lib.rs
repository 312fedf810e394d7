//! The logical type system serialized by the Quiver IPC protocol.
//!
//! Types form a recursive tree: primitive leaves (fixed-width, variable
//! length, boolean) and nested containers (list, struct, union, map) with
//! ordered child fields. A dictionary-encoded type wraps an integer index
//! type around a logical value type. Schemas are ordered field sequences
//! with optional key-value metadata.

mod data_type;
mod field;
mod metadata;
mod schema;

pub use data_type::*;
pub use field::*;
pub use metadata::*;
pub use schema::*;
