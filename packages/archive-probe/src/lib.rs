//! Targeted Web-Archive Discovery Engine
//!
//! Given candidate URLs (or a set of seed domains), find captured copies in
//! a web archive, fetch only the byte ranges that hold them, decompress and
//! scan them in bounded memory, and deliver pattern matches to a sink.
//!
//! # Design Philosophy
//!
//! - Fetch what the index points at, never whole archive files
//! - Every failure is classified; one bad record never stops a job
//! - Bounded everywhere: in-flight fetches, buffered text, queued results
//! - Completed work is checkpointed so a resubmitted job picks up where it stopped
//!
//! # Usage
//!
//! ```rust,ignore
//! use archive_probe::{EngineConfig, JobDescriptor, ProbeEngine};
//! use archive_probe::extractors::RegexExtractor;
//! use archive_probe::resolvers::IndexFileResolver;
//! use archive_probe::sinks::JsonLinesSink;
//! use archive_probe::storage::HttpRangeStorage;
//!
//! let engine = ProbeEngine::new(
//!     EngineConfig::from_env()?,
//!     Arc::new(RegexExtractor::contacts()),
//!     Arc::new(JsonLinesSink::stdout()),
//! )
//! .with_resolver(Arc::new(IndexFileResolver::load("index.jsonl")?))
//! .with_storage(Arc::new(HttpRangeStorage::new("https://data.commoncrawl.org/", timeout)?));
//!
//! let job = JobDescriptor::targeted(["example.com/contact"]).with_output_tag("leads");
//! let summary = engine.run(&job, CancellationToken::new()).await;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Collaborator seams (storage, resolver, extractor, sink, ...)
//! - [`types`] - Coordinates, manifests, matches, summaries and configuration
//! - [`pipeline`] - Target resolution, planning, streaming fetch and crawl
//! - [`storage`] - Archive transports (HTTP range, filesystem)
//! - [`resolvers`] - Coordinate resolvers (JSON-lines capture index)
//! - [`extractors`] - Pattern extractors
//! - [`fetchers`] - Crawl page transports
//! - [`sinks`] - Result sinks
//! - [`checkpoints`] - Completion stores
//! - [`testing`] - Mock implementations for testing

pub mod checkpoints;
pub mod context;
pub mod error;
pub mod extractors;
pub mod fetchers;
pub mod metrics;
pub mod pipeline;
pub mod resolvers;
pub mod retry;
pub mod sinks;
pub mod storage;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{
    CheckpointError, ConfigError, FetchError, PageFetchError, ResolveError, SinkError, SourceError,
};
pub use traits::{
    checkpoint::CheckpointStore,
    extractor::Extractor,
    page_fetcher::{FetchedPage, PageFetcher},
    resolver::CoordinateResolver,
    sink::ResultSink,
    source::CandidateSource,
    storage::{ArchiveStorage, ByteStream},
};
pub use types::{
    config::EngineConfig,
    coordinate::ArchiveCoordinate,
    crawl::{CrawlResult, CrawlTask, DomainState},
    job::{JobDescriptor, JobMode},
    locator::{CandidateLocator, CandidateQuery, ResolvedCandidate, SourceBatch},
    manifest::{CostEstimate, FetchBatch, FetchManifest, PlannedFetch},
    matches::{ExtractionMatch, RawMatch, SinkItem, SinkRecord},
    summary::{DomainTally, FailureReason, FailureRecord, JobOutcome, JobSummary},
};

pub use context::JobContext;
pub use metrics::JobMetrics;
pub use retry::RetryPolicy;

// Re-export the engine and pipeline stages
pub use pipeline::{
    normalize_url, CrawlScheduler, FetchPlanner, ProbeEngine, StreamFetcher, TargetResolver,
};

// Re-export implementations
pub use checkpoints::{FileCheckpoint, MemoryCheckpoint};
pub use extractors::RegexExtractor;
pub use fetchers::{HttpPageFetcher, RateLimitedFetcher};
pub use resolvers::IndexFileResolver;
pub use sinks::{JsonLinesSink, MemorySink};
pub use storage::{FileStorage, HttpRangeStorage};
