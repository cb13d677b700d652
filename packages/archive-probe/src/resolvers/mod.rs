//! Coordinate resolvers.
//!
//! - `IndexFileResolver` - In-memory lookup over a JSON-lines capture index

pub mod index_file;

pub use index_file::{IndexEntry, IndexFileResolver};
