//! Resolver backed by a JSON-lines capture index.
//!
//! Each line describes one capture. Both the engine's own field names and
//! the common columnar-index names are accepted:
//!
//! ```text
//! {"url":"https://example.com/","archive_id":"a.warc.gz","offset":120,"compressed_length":900,"length":2400}
//! {"url":"https://example.com/","filename":"a.warc.gz","offset":"120","length":"900","mime":"text/html"}
//! ```
//!
//! When only `length` is present it is taken as the stored (compressed) size.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::ResolveError;
use crate::pipeline::normalize_url;
use crate::traits::resolver::CoordinateResolver;
use crate::types::coordinate::ArchiveCoordinate;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(u64),
    Text(String),
}

impl Numeric {
    fn value(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// One line of the capture index.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
    pub url: String,

    #[serde(alias = "filename")]
    pub archive_id: String,

    offset: Numeric,

    #[serde(default)]
    length: Option<Numeric>,

    #[serde(default)]
    compressed_length: Option<Numeric>,

    #[serde(default, alias = "mime")]
    pub content_hint: Option<String>,
}

impl IndexEntry {
    /// Convert to a coordinate. `None` if a numeric field is unreadable.
    pub fn coordinate(&self) -> Option<ArchiveCoordinate> {
        let offset = self.offset.value()?;
        let length = self.length.as_ref().map(Numeric::value);
        let compressed = self.compressed_length.as_ref().map(Numeric::value);

        let (compressed, length) = match (compressed, length) {
            (Some(c), Some(l)) => (c?, l?),
            (Some(c), None) => (c?, c?),
            (None, Some(l)) => (l?, l?),
            (None, None) => return None,
        };

        let mut coord = ArchiveCoordinate::new(self.archive_id.clone(), offset, compressed).with_length(length);
        if let Some(hint) = &self.content_hint {
            coord = coord.with_content_hint(hint.clone());
        }
        Some(coord)
    }
}

/// Looks coordinates up in an index loaded into memory.
///
/// Keys are normalized URLs, so index entries and candidates only need to
/// agree after normalization.
#[derive(Debug, Default, Clone)]
pub struct IndexFileResolver {
    entries: HashMap<String, Vec<ArchiveCoordinate>>,
}

impl IndexFileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already parsed entries. Unusable entries are skipped.
    pub fn from_entries(entries: impl IntoIterator<Item = IndexEntry>) -> Self {
        let mut resolver = Self::new();
        for entry in entries {
            resolver.insert(entry);
        }
        resolver
    }

    /// Parse a JSON-lines index. Blank lines are ignored; malformed lines
    /// are logged and skipped.
    pub fn from_reader(reader: impl BufRead) -> std::io::Result<Self> {
        let mut resolver = Self::new();
        let mut skipped = 0usize;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IndexEntry>(&line) {
                Ok(entry) => {
                    if !resolver.insert(entry) {
                        skipped += 1;
                    }
                }
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "skipping malformed index line");
                    skipped += 1;
                }
            }
        }
        debug!(urls = resolver.len(), skipped, "capture index loaded");
        Ok(resolver)
    }

    /// Load an index file.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Add one entry. Returns `false` if it was unusable.
    pub fn insert(&mut self, entry: IndexEntry) -> bool {
        let (Some(key), Some(coord)) = (normalize_url(&entry.url), entry.coordinate()) else {
            return false;
        };
        self.entries.entry(key).or_default().push(coord);
        true
    }

    /// Number of distinct URLs indexed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CoordinateResolver for IndexFileResolver {
    async fn resolve(&self, url: &str) -> Result<Vec<ArchiveCoordinate>, ResolveError> {
        let key = normalize_url(url).unwrap_or_else(|| url.to_string());
        self.entries
            .get(&key)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound { url: url.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const INDEX: &str = r#"
{"url":"https://example.com/","archive_id":"a.warc.gz","offset":120,"compressed_length":900,"length":2400}
{"url":"http://www.example.org/contact","filename":"b.warc.gz","offset":"64","length":"512","mime":"text/html"}
not json
{"url":"https://example.com","archive_id":"c.warc.gz","offset":0,"length":10}
{"url":"https://broken.example/","archive_id":"d.warc.gz","offset":"x","length":10}
"#;

    #[tokio::test]
    async fn test_resolves_both_field_styles() {
        let resolver = IndexFileResolver::from_reader(Cursor::new(INDEX)).unwrap();
        assert_eq!(resolver.len(), 2);

        let coords = resolver.resolve("https://EXAMPLE.com/?utm_source=x").await.unwrap();
        assert_eq!(coords.len(), 2);
        assert_eq!(coords[0].compressed_length, 900);
        assert_eq!(coords[0].length, 2400);
        assert_eq!(coords[1].archive_id, "c.warc.gz");

        let coords = resolver.resolve("http://www.example.org/contact/").await.unwrap();
        assert_eq!(coords[0].offset, 64);
        assert_eq!(coords[0].compressed_length, 512);
        assert_eq!(coords[0].content_hint.as_deref(), Some("text/html"));
    }

    #[tokio::test]
    async fn test_unknown_url_is_not_found() {
        let resolver = IndexFileResolver::new();
        assert!(matches!(
            resolver.resolve("https://nowhere.example/").await,
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.jsonl");
        std::fs::write(&path, INDEX).unwrap();
        assert_eq!(IndexFileResolver::load(&path).unwrap().len(), 2);
    }
}
