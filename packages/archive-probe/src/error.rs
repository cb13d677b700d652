//! Typed errors for the probe engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so every failure
//! can be classified into the job summary without string matching.

use thiserror::Error;

/// Errors raised while fetching and decoding a single archive coordinate.
///
/// Only [`FetchError::StorageUnavailable`] can escalate into a job abort,
/// and only after a run of consecutive occurrences.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The candidate URL has no archive coordinate
    #[error("no archive coordinate for {url}")]
    MissingCoordinate { url: String },

    /// Timeout, connection reset or similar; retried with backoff
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Not found, invalid range and similar; never retried
    #[error("permanent fetch error: {0}")]
    Permanent(String),

    /// The record could not be decompressed or framed
    #[error("decode error: {0}")]
    Decode(String),

    /// The storage transport itself is down
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The job was cancelled while this coordinate was in flight
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::StorageUnavailable(_))
    }
}

/// Invalid engine or job configuration. Always fatal, always raised before
/// the first fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A value must be strictly positive
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    /// A value is outside its accepted range
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// An environment variable could not be parsed
    #[error("environment variable {name} is invalid: {reason}")]
    Env { name: String, reason: String },
}

/// Errors from a coordinate resolver.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The index holds no record for this URL
    #[error("no archive record for {url}")]
    NotFound { url: String },

    /// The index could not be queried
    #[error("coordinate index error: {0}")]
    Index(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from an intelligence source.
#[derive(Debug, Error)]
#[error("candidate source {source_tag} failed: {message}")]
pub struct SourceError {
    pub source_tag: String,
    pub message: String,
}

/// Errors reported by a result sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink is saturated or temporarily unable to accept
    #[error("sink rejected record (retryable: {retryable})")]
    Rejected { retryable: bool },

    /// The sink failed while writing
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be serialized
    #[error("sink serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SinkError {
    /// Whether the driver should offer the same record again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected { retryable: true })
    }
}

/// Errors raised by a crawl page transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PageFetchError {
    /// The host asked us to slow down
    #[error("rate limited by host (retry after {retry_after:?})")]
    RateLimited {
        retry_after: Option<std::time::Duration>,
    },

    /// Timeout, reset, 5xx
    #[error("transient page error: {0}")]
    Transient(String),

    /// 4xx other than 429, unsupported content
    #[error("page failed with status {status}")]
    Status { status: u16 },

    /// URL could not be parsed or is not crawlable
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

impl PageFetchError {
    /// Whether another attempt (counted against the retry budget) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors from a checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The checkpoint file could not be read or written
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking checkpoint task panicked or was cancelled
    #[error("checkpoint task failed: {0}")]
    Task(String),
}

/// Result type alias for coordinate fetches.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for crawl page fetches.
pub type PageResult<T> = std::result::Result<T, PageFetchError>;

/// Result type alias for checkpoint operations.
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;
