//! Checkpoint store implementations.
//!
//! Available backends:
//! - `MemoryCheckpoint` - In-memory (tests, single-process resubmission)
//! - `FileCheckpoint` - Append-only completion log on disk

pub mod file;
pub mod memory;

pub use file::FileCheckpoint;
pub use memory::MemoryCheckpoint;
