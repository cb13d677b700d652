//! Archive coordinates - where a captured record lives in storage.

use serde::{Deserialize, Serialize};

/// Exact location of one archive record.
///
/// Immutable once resolved. `compressed_length` is the span occupied in
/// storage starting at `offset`; it is what gets range-fetched and what
/// batches are budgeted by. `length` is the inflated record size as
/// reported by the index and is only used for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveCoordinate {
    /// Archive file identifier (path or object key)
    pub archive_id: String,

    /// Byte offset of the record inside the archive file
    pub offset: u64,

    /// Inflated record length
    pub length: u64,

    /// Stored (compressed) record length
    pub compressed_length: u64,

    /// Optional MIME hint from the index (e.g. "text/html")
    #[serde(default)]
    pub content_hint: Option<String>,
}

impl ArchiveCoordinate {
    /// Create a coordinate whose stored and inflated lengths are unknown to differ.
    pub fn new(archive_id: impl Into<String>, offset: u64, compressed_length: u64) -> Self {
        Self {
            archive_id: archive_id.into(),
            offset,
            length: compressed_length,
            compressed_length,
            content_hint: None,
        }
    }

    /// Set the inflated length.
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    /// Set the content hint.
    pub fn with_content_hint(mut self, hint: impl Into<String>) -> Self {
        self.content_hint = Some(hint.into());
        self
    }

    /// Bytes read from storage for this coordinate.
    pub fn fetch_span(&self) -> u64 {
        self.compressed_length
    }

    /// A coordinate may enter a manifest only if it is addressable.
    pub fn is_valid(&self) -> bool {
        !self.archive_id.trim().is_empty() && self.length > 0 && self.compressed_length > 0
    }

    /// Stable key used for checkpointing and dedupe.
    pub fn checkpoint_key(&self) -> String {
        format!(
            "coord:{}:{}:{}",
            self.archive_id, self.offset, self.compressed_length
        )
    }
}

impl std::fmt::Display for ArchiveCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}+{}",
            self.archive_id, self.offset, self.compressed_length
        )
    }
}
