//! Extraction matches and the records delivered to a result sink.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::coordinate::ArchiveCoordinate;
use super::crawl::CrawlResult;

/// A match as returned by an extractor, relative to the text it was given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMatch {
    pub pattern_type: String,
    pub value: String,
    pub context_before: String,
    pub context_after: String,

    /// Byte offset of `value` in the text passed to the extractor
    pub offset: usize,
}

impl RawMatch {
    pub fn new(pattern_type: impl Into<String>, value: impl Into<String>, offset: usize) -> Self {
        Self {
            pattern_type: pattern_type.into(),
            value: value.into(),
            context_before: String::new(),
            context_after: String::new(),
            offset,
        }
    }

    pub fn with_context(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.context_before = before.into();
        self.context_after = after.into();
        self
    }

    /// Byte offset just past the matched value.
    pub fn end(&self) -> usize {
        self.offset + self.value.len()
    }
}

/// A match found in an archive payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMatch {
    pub pattern_type: String,
    pub value: String,
    pub context_before: String,
    pub context_after: String,

    /// Candidate URL (or crawled page URL) the payload belongs to
    pub source_url: String,

    /// Source tag preserved for the presentation layer
    pub source_tag: String,

    /// Archive coordinate the payload came from (None for crawled pages)
    pub coordinate: Option<ArchiveCoordinate>,

    /// Byte offset of the value in the decoded payload text
    pub payload_offset: u64,
}

impl ExtractionMatch {
    /// Anchor a raw match to its payload.
    pub fn from_raw(
        raw: RawMatch,
        payload_offset: u64,
        source_url: impl Into<String>,
        source_tag: impl Into<String>,
        coordinate: Option<ArchiveCoordinate>,
    ) -> Self {
        Self {
            pattern_type: raw.pattern_type,
            value: raw.value,
            context_before: raw.context_before,
            context_after: raw.context_after,
            source_url: source_url.into(),
            source_tag: source_tag.into(),
            coordinate,
            payload_offset,
        }
    }
}

/// What a sink receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkItem {
    Match(ExtractionMatch),
    Crawl(CrawlResult),
}

/// A sink item stamped with the job that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub job_id: Uuid,
    pub output_tag: String,
    pub item: SinkItem,
}

impl SinkRecord {
    /// The match carried by this record, if any.
    pub fn as_match(&self) -> Option<&ExtractionMatch> {
        match &self.item {
            SinkItem::Match(m) => Some(m),
            SinkItem::Crawl(_) => None,
        }
    }

    /// The crawl result carried by this record, if any.
    pub fn as_crawl(&self) -> Option<&CrawlResult> {
        match &self.item {
            SinkItem::Crawl(c) => Some(c),
            SinkItem::Match(_) => None,
        }
    }
}
