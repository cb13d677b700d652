//! Page transport used by the crawl scheduler.

use async_trait::async_trait;

use crate::error::PageResult;

/// A fetched crawl page.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// URL that was requested
    pub url: String,

    /// URL after redirects (links resolve against this)
    pub final_url: String,

    pub status_code: u16,

    pub content_type: Option<String>,

    pub body: String,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            status_code: 200,
            content_type: Some("text/html".to_string()),
            body: body.into(),
        }
    }

    pub fn with_final_url(mut self, final_url: impl Into<String>) -> Self {
        self.final_url = final_url.into();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = status;
        self
    }

    /// Whether links should be harvested from the body.
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("html"))
            .unwrap_or(true)
    }
}

/// Fetches live pages for the crawl path.
///
/// Rate-limit signals must surface as `PageFetchError::RateLimited` so the
/// scheduler can delay and retry instead of dropping the domain.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> PageResult<FetchedPage>;

    fn name(&self) -> &str {
        "unknown"
    }
}
