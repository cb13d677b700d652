//! Job descriptors as submitted by the orchestration layer.

use serde::{Deserialize, Serialize};

/// Which path a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Resolve candidates to archive coordinates and range-fetch them
    Targeted,
    /// Crawl seed domains live
    Crawl,
}

/// Parsed job submission.
///
/// Optional fields fall back to the engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub mode: JobMode,

    /// Candidate URLs (targeted) or seed domains (crawl)
    #[serde(default)]
    pub candidates_or_seeds: Vec<String>,

    #[serde(default)]
    pub max_pages: Option<usize>,

    #[serde(default)]
    pub max_depth: Option<u32>,

    #[serde(default)]
    pub concurrency_limit: Option<usize>,

    #[serde(default)]
    pub batch_max_bytes: Option<u64>,

    /// Free-form tag stamped on every sink record
    #[serde(default)]
    pub output_tag: String,
}

impl JobDescriptor {
    /// A targeted job over explicit candidate URLs.
    pub fn targeted(candidates: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(JobMode::Targeted, candidates)
    }

    /// A crawl job over seed domains.
    pub fn crawl(seeds: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(JobMode::Crawl, seeds)
    }

    fn new(mode: JobMode, items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mode,
            candidates_or_seeds: items.into_iter().map(Into::into).collect(),
            max_pages: None,
            max_depth: None,
            concurrency_limit: None,
            batch_max_bytes: None,
            output_tag: String::new(),
        }
    }

    pub fn with_max_pages(mut self, max: usize) -> Self {
        self.max_pages = Some(max);
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn with_batch_max_bytes(mut self, bytes: u64) -> Self {
        self.batch_max_bytes = Some(bytes);
        self
    }

    pub fn with_output_tag(mut self, tag: impl Into<String>) -> Self {
        self.output_tag = tag.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_json() {
        let json = r#"{
            "mode": "crawl",
            "candidates_or_seeds": ["example.com"],
            "max_depth": 1,
            "output_tag": "acme"
        }"#;
        let job: JobDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(job.mode, JobMode::Crawl);
        assert_eq!(job.max_depth, Some(1));
        assert_eq!(job.max_pages, None);
        assert_eq!(job.output_tag, "acme");
    }
}
