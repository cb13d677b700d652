//! Per-host rate limiting for page fetchers.
//!
//! Wraps any [`PageFetcher`] with a keyed governor limiter so each host
//! gets its own budget. Crawl workers sharing one wrapper never exceed the
//! per-host rate between them.

use async_trait::async_trait;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::{ConfigError, PageResult};
use crate::pipeline::links::site_host;
use crate::traits::page_fetcher::{FetchedPage, PageFetcher};

/// A fetcher wrapper that enforces a per-host request rate.
pub struct RateLimitedFetcher<F: PageFetcher> {
    inner: F,
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl<F: PageFetcher> RateLimitedFetcher<F> {
    /// Allow `requests_per_second` per host.
    pub fn new(fetcher: F, requests_per_second: u32) -> Result<Self, ConfigError> {
        let rate = NonZeroU32::new(requests_per_second).ok_or(ConfigError::Zero {
            field: "requests_per_second",
        })?;
        Ok(Self::with_quota(fetcher, Quota::per_second(rate)))
    }

    /// Allow bursts of up to `burst` requests per host.
    pub fn with_burst(fetcher: F, requests_per_second: u32, burst: u32) -> Result<Self, ConfigError> {
        let rate = NonZeroU32::new(requests_per_second).ok_or(ConfigError::Zero {
            field: "requests_per_second",
        })?;
        let burst = NonZeroU32::new(burst).ok_or(ConfigError::Zero { field: "burst" })?;
        Ok(Self::with_quota(fetcher, Quota::per_second(rate).allow_burst(burst)))
    }

    pub fn with_quota(fetcher: F, quota: Quota) -> Self {
        Self {
            inner: fetcher,
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }
}

#[async_trait]
impl<F: PageFetcher> PageFetcher for RateLimitedFetcher<F> {
    async fn fetch(&self, url: &str) -> PageResult<FetchedPage> {
        // Unparseable URLs go straight through so the inner fetcher reports them
        if let Some(host) = site_host(url) {
            self.limiter.until_key_ready(&host).await;
        }
        self.inner.fetch(url).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
