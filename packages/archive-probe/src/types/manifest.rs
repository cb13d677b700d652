//! Fetch manifests - the planned, batched set of coordinates for a job.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::coordinate::ArchiveCoordinate;

/// A coordinate together with the candidate that led to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedFetch {
    pub coordinate: ArchiveCoordinate,

    /// URL as given by the winning locator; resolution used its normalized form
    pub source_url: String,

    /// Tag of the source that surfaced the candidate
    pub source_tag: String,
}

/// One batch of planned fetches.
///
/// Total fetch span never exceeds the planner's byte cap, except when the
/// batch holds exactly one oversized coordinate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchBatch {
    pub fetches: Vec<PlannedFetch>,
}

impl FetchBatch {
    /// Sum of storage bytes fetched by this batch.
    pub fn total_bytes(&self) -> u64 {
        self.fetches.iter().map(|f| f.coordinate.fetch_span()).sum()
    }

    pub fn len(&self) -> usize {
        self.fetches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty()
    }
}

/// Reporting-only estimate of what a manifest will cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Storage bytes to fetch
    pub total_bytes: u64,

    /// Inflated bytes the index reports for those records
    pub inflated_bytes: u64,

    /// Distinct archive files touched
    pub distinct_archives: usize,

    pub batch_count: usize,

    /// `total_bytes / assumed throughput`
    #[serde(with = "duration_secs")]
    pub estimated_duration: Duration,
}

/// Ordered batches plus their estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchManifest {
    pub batches: Vec<FetchBatch>,
    pub estimate: CostEstimate,
}

impl FetchManifest {
    /// Total number of coordinates across all batches.
    pub fn coordinate_count(&self) -> usize {
        self.batches.iter().map(FetchBatch::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(FetchBatch::is_empty)
    }

    /// Iterate planned fetches in manifest order.
    pub fn fetches(&self) -> impl Iterator<Item = &PlannedFetch> {
        self.batches.iter().flat_map(|b| b.fetches.iter())
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
