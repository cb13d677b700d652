//! Pipeline stages.
//!
//! - `target`: merge and normalize candidate URLs
//! - `planner`: resolve coordinates and batch them
//! - `fetcher`: streaming range fetch, decode and extraction
//! - `record` / `window`: incremental decoding and windowed extraction
//! - `crawl` / `links`: bounded domain crawling
//! - `emit`: bounded delivery to the result sink
//! - `job`: the engine that runs a whole job

pub mod crawl;
pub mod emit;
pub mod fetcher;
pub mod job;
pub mod links;
pub mod planner;
pub mod record;
pub mod target;
pub mod window;

pub use crawl::{CrawlReport, CrawlScheduler};
pub use emit::{DeliveryStats, Emitter, SinkDriver};
pub use fetcher::{FetchOutcome, FetchReport, StreamFetcher};
pub use job::ProbeEngine;
pub use planner::{FetchPlanner, PlanOutcome};
pub use record::{RecordDecoder, RecordMeta, Utf8Decoder};
pub use target::{normalize_url, ExclusionFilter, ResolvedTargets, TargetResolver};
pub use window::WindowedExtractor;
