//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::types::job::JobDescriptor;
use crate::types::manifest::duration_secs;

/// Tunables for planning, fetching and crawling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Source tags in priority order; unlisted sources rank after these
    pub source_priority: Vec<String>,

    /// Concurrent coordinate-resolution lookups
    pub resolve_concurrency: usize,

    /// Storage bytes allowed in one fetch batch
    pub batch_max_bytes: u64,

    /// Throughput assumed by the cost estimate (reporting only)
    pub assumed_throughput_bytes_per_sec: u64,

    /// Maximum simultaneous range fetches
    pub concurrency_limit: usize,

    /// Bounds opening a range and every chunk read
    #[serde(with = "duration_secs")]
    pub per_fetch_timeout: Duration,

    pub retry: RetryPolicy,

    /// Consecutive StorageUnavailable outcomes that abort the job
    pub max_consecutive_unavailable: usize,

    /// Records buffered between producers and the sink
    pub sink_queue_capacity: usize,

    /// Decoded payload bytes handed to the extractor at once
    pub window_bytes: usize,

    /// Bytes shared by consecutive windows
    pub window_overlap_bytes: usize,

    /// Largest WARC or HTTP header block accepted
    pub max_header_bytes: usize,

    /// Crawl worker pool size (W)
    pub crawl_workers: usize,

    /// Concurrent domains per crawl worker (C)
    pub domains_per_worker: usize,

    pub max_depth: u32,

    pub max_pages: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_priority: Vec::new(),
            resolve_concurrency: 8,
            batch_max_bytes: 64 * 1024 * 1024,
            assumed_throughput_bytes_per_sec: 20 * 1024 * 1024,
            concurrency_limit: 16,
            per_fetch_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            max_consecutive_unavailable: 5,
            sink_queue_capacity: 1024,
            window_bytes: 256 * 1024,
            window_overlap_bytes: 4 * 1024,
            max_header_bytes: 64 * 1024,
            crawl_workers: 4,
            domains_per_worker: 4,
            max_depth: 2,
            max_pages: 50,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `PROBE_*` environment variables, reading a
    /// `.env` file first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let retry = RetryPolicy {
            max_attempts: env_or("PROBE_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            initial_backoff: Duration::from_millis(env_or(
                "PROBE_INITIAL_BACKOFF_MS",
                defaults.retry.initial_backoff.as_millis() as u64,
            )?),
            ..defaults.retry.clone()
        };

        let source_priority = match env::var("PROBE_SOURCE_PRIORITY") {
            Ok(value) => value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.source_priority.clone(),
        };

        let config = Self {
            source_priority,
            resolve_concurrency: env_or("PROBE_RESOLVE_CONCURRENCY", defaults.resolve_concurrency)?,
            batch_max_bytes: env_or("PROBE_BATCH_MAX_BYTES", defaults.batch_max_bytes)?,
            assumed_throughput_bytes_per_sec: env_or(
                "PROBE_ASSUMED_THROUGHPUT",
                defaults.assumed_throughput_bytes_per_sec,
            )?,
            concurrency_limit: env_or("PROBE_CONCURRENCY", defaults.concurrency_limit)?,
            per_fetch_timeout: Duration::from_secs(env_or(
                "PROBE_FETCH_TIMEOUT_SECS",
                defaults.per_fetch_timeout.as_secs(),
            )?),
            retry,
            max_consecutive_unavailable: env_or(
                "PROBE_MAX_CONSECUTIVE_UNAVAILABLE",
                defaults.max_consecutive_unavailable,
            )?,
            sink_queue_capacity: env_or("PROBE_SINK_QUEUE", defaults.sink_queue_capacity)?,
            crawl_workers: env_or("PROBE_CRAWL_WORKERS", defaults.crawl_workers)?,
            domains_per_worker: env_or("PROBE_DOMAINS_PER_WORKER", defaults.domains_per_worker)?,
            max_depth: env_or("PROBE_MAX_DEPTH", defaults.max_depth)?,
            max_pages: env_or("PROBE_MAX_PAGES", defaults.max_pages)?,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Check every value before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("resolve_concurrency", self.resolve_concurrency as u64)?;
        non_zero("batch_max_bytes", self.batch_max_bytes)?;
        non_zero(
            "assumed_throughput_bytes_per_sec",
            self.assumed_throughput_bytes_per_sec,
        )?;
        non_zero("concurrency_limit", self.concurrency_limit as u64)?;
        non_zero("retry.max_attempts", self.retry.max_attempts as u64)?;
        non_zero(
            "max_consecutive_unavailable",
            self.max_consecutive_unavailable as u64,
        )?;
        non_zero("sink_queue_capacity", self.sink_queue_capacity as u64)?;
        non_zero("max_header_bytes", self.max_header_bytes as u64)?;
        non_zero("crawl_workers", self.crawl_workers as u64)?;
        non_zero("domains_per_worker", self.domains_per_worker as u64)?;
        non_zero("max_pages", self.max_pages as u64)?;

        if self.per_fetch_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "per_fetch_timeout",
            });
        }
        if self.window_bytes <= self.window_overlap_bytes.saturating_mul(2) {
            return Err(ConfigError::Invalid {
                field: "window_bytes",
                reason: format!(
                    "must exceed twice window_overlap_bytes ({})",
                    self.window_overlap_bytes
                ),
            });
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                reason: "must be a finite value >= 1.0".to_string(),
            });
        }
        Ok(())
    }

    /// Apply the overrides carried by a job descriptor.
    pub fn for_job(&self, job: &JobDescriptor) -> Self {
        let mut config = self.clone();
        if let Some(limit) = job.concurrency_limit {
            config.concurrency_limit = limit;
        }
        if let Some(bytes) = job.batch_max_bytes {
            config.batch_max_bytes = bytes;
        }
        if let Some(depth) = job.max_depth {
            config.max_depth = depth;
        }
        if let Some(pages) = job.max_pages {
            config.max_pages = pages;
        }
        config
    }

    pub fn with_source_priority(
        mut self,
        tags: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.source_priority = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_batch_max_bytes(mut self, bytes: u64) -> Self {
        self.batch_max_bytes = bytes;
        self
    }

    pub fn with_per_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.per_fetch_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_consecutive_unavailable(mut self, count: usize) -> Self {
        self.max_consecutive_unavailable = count;
        self
    }

    pub fn with_sink_queue_capacity(mut self, capacity: usize) -> Self {
        self.sink_queue_capacity = capacity;
        self
    }

    pub fn with_window(mut self, window_bytes: usize, overlap_bytes: usize) -> Self {
        self.window_bytes = window_bytes;
        self.window_overlap_bytes = overlap_bytes;
        self
    }

    pub fn with_crawl_pool(mut self, workers: usize, domains_per_worker: usize) -> Self {
        self.crawl_workers = workers;
        self.domains_per_worker = domains_per_worker;
        self
    }

    pub fn with_crawl_limits(mut self, max_depth: u32, max_pages: usize) -> Self {
        self.max_depth = max_depth;
        self.max_pages = max_pages;
        self
    }
}

fn non_zero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { field })
    } else {
        Ok(())
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let config = EngineConfig::default().with_concurrency_limit(0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "concurrency_limit"
            })
        );
    }

    #[test]
    fn test_rejects_window_smaller_than_overlap() {
        let config = EngineConfig::default().with_window(1024, 512);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "window_bytes",
                ..
            })
        ));
    }

    #[test]
    fn test_job_overrides() {
        let job = JobDescriptor::crawl(["example.com"])
            .with_max_depth(1)
            .with_concurrency_limit(3)
            .with_batch_max_bytes(1000);
        let config = EngineConfig::default().for_job(&job);
        assert_eq!(config.max_depth, 1);
        assert_eq!(config.concurrency_limit, 3);
        assert_eq!(config.batch_max_bytes, 1000);
        assert_eq!(config.max_pages, EngineConfig::default().max_pages);
    }

    #[test]
    fn test_config_deserializes_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"concurrency_limit": 2, "per_fetch_timeout": 1.5}"#).unwrap();
        assert_eq!(config.concurrency_limit, 2);
        assert_eq!(config.per_fetch_timeout, Duration::from_millis(1500));
        assert_eq!(config.batch_max_bytes, EngineConfig::default().batch_max_bytes);
    }
}
