//! HTTP page fetcher.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, PageFetchError, PageResult};
use crate::traits::page_fetcher::{FetchedPage, PageFetcher};

const MAX_REDIRECTS: usize = 5;

/// Fetches live pages for the crawl path.
///
/// Redirects are followed (up to a small limit) and the final URL is
/// reported so same-site checks use where the page actually lives.
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("archive-probe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "page_fetcher",
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Use a custom HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Parse a `Retry-After` header given in seconds. HTTP dates are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> PageFetchError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        PageFetchError::RateLimited { retry_after }
    } else if status.is_server_error() {
        PageFetchError::Transient(format!("HTTP {}", status))
    } else {
        PageFetchError::Status {
            status: status.as_u16(),
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> PageResult<FetchedPage> {
        let parsed = url::Url::parse(url).map_err(|_| PageFetchError::InvalidUrl {
            url: url.to_string(),
        })?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| PageFetchError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            debug!(url = %url, status = status.as_u16(), "page fetch rejected");
            return Err(classify_status(status, retry_after));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| PageFetchError::Transient(e.to_string()))?;

        let mut page = FetchedPage::new(url, body)
            .with_final_url(final_url)
            .with_status(status.as_u16());
        page.content_type = content_type;
        Ok(page)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3))),
            PageFetchError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None),
            PageFetchError::Transient(_)
        ));
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, None),
            PageFetchError::Status { status: 404 }
        );
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let fetcher = HttpPageFetcher::new(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            fetcher.fetch("not a url").await,
            Err(PageFetchError::InvalidUrl { .. })
        ));
    }
}
