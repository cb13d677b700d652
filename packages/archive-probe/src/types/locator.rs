//! Candidate locators produced by intelligence sources.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A URL surfaced by an intelligence source as potentially relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateLocator {
    /// URL as reported by the source (not yet normalized)
    pub url: String,

    /// Which source produced it (e.g. "archive-index", "curated")
    pub source_tag: String,

    /// Source-reported confidence in 0.0..=1.0; never merged across sources
    pub confidence: f32,
}

impl CandidateLocator {
    /// Create a locator with full confidence.
    pub fn new(url: impl Into<String>, source_tag: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source_tag: source_tag.into(),
            confidence: 1.0,
        }
    }

    /// Set the confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

/// All locators returned by one source for one query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceBatch {
    pub source_tag: String,
    pub locators: Vec<CandidateLocator>,
}

impl SourceBatch {
    /// Create a batch, stamping every locator with the batch tag.
    pub fn new(source_tag: impl Into<String>, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let source_tag = source_tag.into();
        let locators = urls
            .into_iter()
            .map(|u| CandidateLocator::new(u, source_tag.clone()))
            .collect();
        Self {
            source_tag,
            locators,
        }
    }

    /// Create a batch from already-built locators.
    pub fn from_locators(source_tag: impl Into<String>, locators: Vec<CandidateLocator>) -> Self {
        Self {
            source_tag: source_tag.into(),
            locators,
        }
    }
}

/// Query passed to every candidate source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateQuery {
    /// Phone number, company name, domain...
    pub identifier: String,

    /// Optional jurisdiction filter (e.g. "us-mn")
    pub jurisdiction: Option<String>,

    /// Optional inclusive capture date range
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl CandidateQuery {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    pub fn with_date_range(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_range = Some((from, to));
        self
    }
}

/// A deduplicated candidate, keyed by its normalized URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCandidate {
    pub normalized_url: String,
    pub locator: CandidateLocator,
}
