//! Result sink implementations.
//!
//! - `MemorySink` - Collects records in memory (testing, embedding)
//! - `JsonLinesSink` - One JSON document per line to a file or stdout

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;
