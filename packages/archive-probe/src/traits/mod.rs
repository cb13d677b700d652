//! Core trait abstractions for the probe engine.
//!
//! These traits are the seams where applications plug in their
//! intelligence sources, archive index, storage transport, extraction
//! rules, result persistence and checkpoint location.

pub mod checkpoint;
pub mod extractor;
pub mod page_fetcher;
pub mod resolver;
pub mod sink;
pub mod source;
pub mod storage;
