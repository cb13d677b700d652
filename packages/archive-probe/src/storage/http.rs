//! HTTP range storage.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{ConfigError, FetchError, FetchResult};
use crate::traits::storage::{ArchiveStorage, ByteStream};

/// Fetches record ranges from archive files served over HTTP(S).
///
/// `archive_id` is resolved against the base URL, so an index that stores
/// `crawl-data/.../file.warc.gz` works against any mirror of the bucket.
///
/// # Example
///
/// ```rust,ignore
/// use archive_probe::storage::HttpRangeStorage;
///
/// let storage = HttpRangeStorage::new("https://data.commoncrawl.org/", Duration::from_secs(10))?;
/// let stream = storage.fetch("crawl-data/CC-MAIN-2024-10/segments/.../file.warc.gz", 1024, 4096).await?;
/// ```
pub struct HttpRangeStorage {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRangeStorage {
    /// Create a storage client. `connect_timeout` bounds connection setup;
    /// read timeouts are enforced by the fetcher.
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, ConfigError> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| ConfigError::Invalid {
            field: "storage_url",
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(32)
            .user_agent(concat!("archive-probe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "storage_url",
                reason: e.to_string(),
            })?;
        Ok(Self { client, base_url })
    }

    /// Use a custom HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn object_url(&self, archive_id: &str) -> FetchResult<Url> {
        self.base_url
            .join(archive_id.trim_start_matches('/'))
            .map_err(|e| FetchError::Permanent(format!("bad archive id {}: {}", archive_id, e)))
    }
}

/// Map a transport error to the fetch taxonomy.
fn classify(err: reqwest::Error) -> FetchError {
    if err.is_connect() {
        FetchError::StorageUnavailable(err.to_string())
    } else {
        FetchError::Transient(err.to_string())
    }
}

fn classify_status(status: StatusCode, url: &Url) -> FetchError {
    let detail = format!("HTTP {} for {}", status, url);
    match status {
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => FetchError::StorageUnavailable(detail),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => FetchError::Transient(detail),
        s if s.is_server_error() => FetchError::Transient(detail),
        _ => FetchError::Permanent(detail),
    }
}

#[async_trait]
impl ArchiveStorage for HttpRangeStorage {
    async fn fetch(&self, archive_id: &str, offset: u64, length: u64) -> FetchResult<ByteStream> {
        if length == 0 {
            return Err(FetchError::Permanent("empty range".to_string()));
        }
        let url = self.object_url(archive_id)?;
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        debug!(url = %url, range = %range, "range request");

        let response = self
            .client
            .get(url.clone())
            .header(RANGE, range)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status == StatusCode::OK {
            // A full-object answer would stream the whole archive
            return Err(FetchError::Permanent(format!(
                "server ignored range request for {}",
                url
            )));
        }
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(classify_status(status, &url));
        }

        Ok(response.bytes_stream().map_err(classify).boxed())
    }

    fn name(&self) -> &str {
        "http-range"
    }
}
