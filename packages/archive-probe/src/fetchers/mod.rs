//! Crawl page transports.
//!
//! - `HttpPageFetcher` - Plain reqwest GETs with status classification
//! - `RateLimitedFetcher` - Per-host politeness wrapper for any fetcher

pub mod http;
pub mod rate_limited;

pub use http::HttpPageFetcher;
pub use rate_limited::RateLimitedFetcher;
