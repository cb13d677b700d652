//! Job summaries - returned for every job, whatever happened.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::job::JobMode;
use super::manifest::{duration_secs, CostEstimate};
use crate::error::{FetchError, PageFetchError};

/// Why a target did not produce results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No coordinate for the candidate (skip, not counted as failed)
    MissingCoordinate,
    /// Coordinate failed index validation (skip, not counted as failed)
    InvalidCoordinate,
    TransientFetch,
    PermanentFetch,
    Decode,
    StorageUnavailable,
    /// A crawl page failed; the domain continues
    PageFailed,
    /// A crawl seed root exhausted its retries
    DomainFailed,
    /// An intelligence source failed to answer
    SourceFailed,
}

impl FailureReason {
    /// Skips are listed for later retry but do not count as failures.
    pub fn is_skip(self) -> bool {
        matches!(
            self,
            Self::MissingCoordinate | Self::InvalidCoordinate | Self::SourceFailed
        )
    }
}

impl From<&FetchError> for FailureReason {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::MissingCoordinate { .. } => Self::MissingCoordinate,
            FetchError::Transient(_) | FetchError::Cancelled => Self::TransientFetch,
            FetchError::Permanent(_) => Self::PermanentFetch,
            FetchError::Decode(_) => Self::Decode,
            FetchError::StorageUnavailable(_) => Self::StorageUnavailable,
        }
    }
}

/// A non-fatal failure with enough detail to retry it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// URL, coordinate or seed the failure applies to
    pub target: String,
    pub reason: FailureReason,
    pub detail: String,
    pub attempts: u32,
}

impl FailureRecord {
    pub fn new(target: impl Into<String>, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason,
            detail: detail.into(),
            attempts: 0,
        }
    }

    pub fn from_fetch_error(target: impl Into<String>, err: &FetchError, attempts: u32) -> Self {
        Self {
            target: target.into(),
            reason: FailureReason::from(err),
            detail: err.to_string(),
            attempts,
        }
    }

    pub fn from_page_error(target: impl Into<String>, err: &PageFetchError, attempts: u32) -> Self {
        Self {
            target: target.into(),
            reason: FailureReason::PageFailed,
            detail: err.to_string(),
            attempts,
        }
    }
}

/// How the job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    /// Stopped by the caller; the checkpoint allows resuming
    Cancelled,
    /// Stopped by a fatal error (configuration, storage outage)
    Aborted { reason: String },
}

/// Domain-level tally for crawl jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTally {
    pub completed: usize,
    pub failed: usize,
    /// Seeds skipped because the completion log already had them
    pub skipped_completed: usize,
    /// Seeds left unfinished by cancellation
    pub unfinished: usize,
}

/// Final report of a job.
///
/// `succeeded`/`failed` count coordinates for targeted jobs and pages for
/// crawl jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub output_tag: String,
    pub mode: JobMode,
    pub outcome: JobOutcome,
    pub succeeded: usize,
    pub failed: usize,
    pub failure_reasons: Vec<FailureRecord>,
    pub bytes_fetched: u64,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub matches_emitted: u64,
    /// Candidates dropped by the exclusion predicate
    pub excluded: usize,
    /// Candidates dropped as normalized duplicates
    pub duplicates: usize,
    /// Candidates whose URL could not be normalized
    pub invalid_candidates: usize,
    pub missing_coordinates: usize,
    /// Coordinates skipped because the checkpoint already had them
    pub skipped_completed: usize,
    /// Coordinates (or crawl domains) left undone by cancellation or abort
    #[serde(default)]
    pub unfinished: usize,
    /// Sink records that could not be delivered
    pub sink_dropped: u64,
    pub estimate: Option<CostEstimate>,
    pub domains: Option<DomainTally>,
}

impl JobSummary {
    /// An empty summary for a job that is about to start.
    pub fn new(job_id: Uuid, output_tag: impl Into<String>, mode: JobMode) -> Self {
        Self {
            job_id,
            output_tag: output_tag.into(),
            mode,
            outcome: JobOutcome::Completed,
            succeeded: 0,
            failed: 0,
            failure_reasons: Vec::new(),
            bytes_fetched: 0,
            duration: Duration::ZERO,
            matches_emitted: 0,
            excluded: 0,
            duplicates: 0,
            invalid_candidates: 0,
            missing_coordinates: 0,
            skipped_completed: 0,
            unfinished: 0,
            sink_dropped: 0,
            estimate: None,
            domains: None,
        }
    }

    /// Mark the job aborted by a fatal error.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.outcome = JobOutcome::Aborted {
            reason: reason.into(),
        };
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == JobOutcome::Completed
    }

    /// Failure records that count as failures (not skips).
    pub fn hard_failures(&self) -> impl Iterator<Item = &FailureRecord> {
        self.failure_reasons.iter().filter(|f| !f.reason.is_skip())
    }
}
