//! Testing utilities including mock implementations.
//!
//! These let applications exercise the engine without a real archive,
//! capture index or network. All mocks are cheap to clone and clones share
//! state, so a test can keep a handle for assertions after moving one into
//! the engine.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::error::{FetchError, FetchResult, PageFetchError, PageResult, ResolveError, SourceError};
use crate::extractors::RegexExtractor;
use crate::pipeline::normalize_url;
use crate::traits::{
    extractor::Extractor,
    page_fetcher::{FetchedPage, PageFetcher},
    resolver::CoordinateResolver,
    source::CandidateSource,
    storage::{ArchiveStorage, ByteStream},
};
use crate::types::coordinate::ArchiveCoordinate;
use crate::types::locator::{CandidateLocator, CandidateQuery};
use crate::types::matches::RawMatch;

const MOCK_CHUNK: usize = 16;

/// An uncompressed WARC response record whose HTTP body is `body`.
pub fn warc_record(url: &str, body: &str) -> Vec<u8> {
    let http = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    format!(
        "WARC/1.0\r\nWARC-Type: response\r\nWARC-Target-URI: {}\r\nContent-Type: application/http; msgtype=response\r\nContent-Length: {}\r\n\r\n{}\r\n\r\n",
        url,
        http.len(),
        http
    )
    .into_bytes()
}

/// `record` as a single gzip member, the way archives store it.
pub fn gzip_record(record: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(record).unwrap();
    encoder.finish().unwrap()
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Clone)]
enum Injected {
    /// Break the stream halfway through, this many more times
    Midway(usize),
    /// Fail every open with this error
    Always(FetchError),
}

#[derive(Default)]
struct StorageState {
    archives: HashMap<String, Vec<u8>>,
    failures: HashMap<String, Injected>,
    fetches: HashMap<String, usize>,
    in_flight: usize,
    peak_in_flight: usize,
}

/// In-memory archive storage.
///
/// Records are appended to named archives; each append returns the
/// coordinate of the new record. Streams are served in small chunks so
/// incremental decoding is exercised.
#[derive(Clone, Default)]
pub struct MockStorage {
    state: Arc<Mutex<StorageState>>,
    latency: Option<Duration>,
    chunk_size: Option<usize>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to `archive` and return its coordinate.
    pub fn add_record(&self, archive: &str, record: &[u8]) -> ArchiveCoordinate {
        self.add_raw(archive, record)
    }

    /// Append arbitrary bytes to `archive` and return their coordinate.
    pub fn add_raw(&self, archive: &str, bytes: &[u8]) -> ArchiveCoordinate {
        let mut state = self.state.lock().unwrap();
        let data = state.archives.entry(archive.to_string()).or_default();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        ArchiveCoordinate::new(archive, offset, bytes.len() as u64)
    }

    /// Break the first `times` streams of `coord` halfway with a transient error.
    pub fn fail_midway(self, coord: &ArchiveCoordinate, times: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(coord.checkpoint_key(), Injected::Midway(times));
        self
    }

    /// Fail every fetch of `coord` with `error`.
    pub fn fail_with(self, coord: &ArchiveCoordinate, error: FetchError) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(coord.checkpoint_key(), Injected::Always(error));
        self
    }

    /// Wait this long before answering each fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Serve streams in chunks of `size` bytes instead of the default 16.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// How many times `coord` was requested.
    pub fn fetch_count(&self, coord: &ArchiveCoordinate) -> usize {
        self.state
            .lock()
            .unwrap()
            .fetches
            .get(&coord.checkpoint_key())
            .copied()
            .unwrap_or(0)
    }

    /// Total fetches across all coordinates.
    pub fn total_fetches(&self) -> usize {
        self.state.lock().unwrap().fetches.values().sum()
    }

    /// Most fetches that were waiting on latency at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }

    fn open(&self, key: &str, archive_id: &str, offset: u64, length: u64) -> FetchResult<(Vec<u8>, bool)> {
        let mut state = self.state.lock().unwrap();
        *state.fetches.entry(key.to_string()).or_default() += 1;

        let mut break_midway = false;
        match state.failures.get_mut(key) {
            Some(Injected::Always(error)) => return Err(error.clone()),
            Some(Injected::Midway(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                break_midway = true;
            }
            _ => {}
        }

        let data = state
            .archives
            .get(archive_id)
            .ok_or_else(|| FetchError::Permanent(format!("no archive {}", archive_id)))?;
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= data.len() as u64)
            .ok_or_else(|| FetchError::Permanent(format!("range beyond end of {}", archive_id)))?;
        Ok((data[offset as usize..end as usize].to_vec(), break_midway))
    }
}

#[async_trait]
impl ArchiveStorage for MockStorage {
    async fn fetch(&self, archive_id: &str, offset: u64, length: u64) -> FetchResult<ByteStream> {
        let key = ArchiveCoordinate::new(archive_id, offset, length).checkpoint_key();

        if let Some(latency) = self.latency {
            {
                let mut state = self.state.lock().unwrap();
                state.in_flight += 1;
                state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            }
            tokio::time::sleep(latency).await;
            self.state.lock().unwrap().in_flight -= 1;
        }

        let (bytes, break_midway) = self.open(&key, archive_id, offset, length)?;
        let mut chunks: Vec<FetchResult<Bytes>> = bytes
            .chunks(self.chunk_size.unwrap_or(MOCK_CHUNK))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if break_midway {
            chunks.truncate(chunks.len() / 2);
            chunks.push(Err(FetchError::Transient("connection reset".to_string())));
        }
        Ok(futures::stream::iter(chunks).boxed())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Resolver and sources
// ============================================================================

/// Resolver answering from a fixed table. Unknown URLs are not found.
#[derive(Clone, Default)]
pub struct MockResolver {
    coordinates: Arc<RwLock<HashMap<String, Vec<ArchiveCoordinate>>>>,
    errors: Arc<RwLock<HashMap<String, String>>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coordinates(self, url: &str, coordinates: Vec<ArchiveCoordinate>) -> Self {
        self.coordinates
            .write()
            .unwrap()
            .insert(url.to_string(), coordinates);
        self
    }

    /// Make lookups of `url` fail with an index error.
    pub fn with_error(self, url: &str, message: &str) -> Self {
        self.errors
            .write()
            .unwrap()
            .insert(url.to_string(), message.to_string());
        self
    }
}

#[async_trait]
impl CoordinateResolver for MockResolver {
    async fn resolve(&self, url: &str) -> Result<Vec<ArchiveCoordinate>, ResolveError> {
        if let Some(message) = self.errors.read().unwrap().get(url) {
            return Err(ResolveError::Index(message.clone().into()));
        }
        self.coordinates
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound { url: url.to_string() })
    }
}

/// Candidate source returning a fixed list, or always failing.
#[derive(Clone)]
pub struct MockSource {
    tag: String,
    urls: Vec<String>,
    fail: bool,
}

impl MockSource {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            urls: Vec::new(),
            fail: false,
        }
    }

    pub fn failing(tag: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(tag)
        }
    }

    pub fn with_urls(mut self, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.urls.extend(urls.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl CandidateSource for MockSource {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn query(&self, _query: &CandidateQuery) -> Result<Vec<CandidateLocator>, SourceError> {
        if self.fail {
            return Err(SourceError {
                source_tag: self.tag.clone(),
                message: "source offline".to_string(),
            });
        }
        Ok(self
            .urls
            .iter()
            .map(|url| CandidateLocator::new(url.clone(), self.tag.clone()))
            .collect())
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Regex extractor that counts its invocations.
#[derive(Clone)]
pub struct MockExtractor {
    inner: RegexExtractor,
    calls: Arc<AtomicUsize>,
}

impl MockExtractor {
    /// Matches `NNN-NNNN` with four characters of context.
    pub fn phones() -> Self {
        let inner = RegexExtractor::new()
            .with_pattern("phone", r"\d{3}-\d{4}")
            .unwrap()
            .with_context_chars(4);
        Self {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Extractor for MockExtractor {
    fn extract(&self, text: &str) -> Vec<RawMatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.extract(text)
    }
}

// ============================================================================
// Page fetcher
// ============================================================================

#[derive(Default)]
struct PageState {
    pages: HashMap<String, FetchedPage>,
    errors: HashMap<String, PageFetchError>,
    rate_limits: HashMap<String, (usize, Duration)>,
    requested: Vec<String>,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Page fetcher over a fixed site map.
///
/// URLs are compared after normalization. Unknown URLs answer 404.
#[derive(Clone, Default)]
pub struct MockPageFetcher {
    state: Arc<Mutex<PageState>>,
    latency: Option<Duration>,
}

fn page_key(url: &str) -> String {
    normalize_url(url).unwrap_or_else(|| url.to_string())
}

impl MockPageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` as HTML at `url`.
    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(page_key(url), FetchedPage::new(url, body));
        self
    }

    /// Serve a fully specified page.
    pub fn with_fetched(self, page: FetchedPage) -> Self {
        self.state.lock().unwrap().pages.insert(page_key(&page.url), page);
        self
    }

    pub fn with_error(self, url: &str, error: PageFetchError) -> Self {
        self.state.lock().unwrap().errors.insert(page_key(url), error);
        self
    }

    /// Answer the first `times` requests for `url` with a rate-limit signal.
    pub fn rate_limited(self, url: &str, times: usize, retry_after: Duration) -> Self {
        self.state
            .lock()
            .unwrap()
            .rate_limits
            .insert(page_key(url), (times, retry_after));
        self
    }

    /// Wait this long before answering each request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().requested.len()
    }

    /// Most requests that were waiting on latency at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }

    /// URLs requested so far, in order.
    pub fn requested(&self) -> Vec<String> {
        self.state.lock().unwrap().requested.clone()
    }
}

#[async_trait]
impl PageFetcher for MockPageFetcher {
    async fn fetch(&self, url: &str) -> PageResult<FetchedPage> {
        if let Some(latency) = self.latency {
            {
                let mut state = self.state.lock().unwrap();
                state.in_flight += 1;
                state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            }
            tokio::time::sleep(latency).await;
            self.state.lock().unwrap().in_flight -= 1;
        }

        let key = page_key(url);
        let mut state = self.state.lock().unwrap();
        state.requested.push(url.to_string());

        if let Some((remaining, retry_after)) = state.rate_limits.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PageFetchError::RateLimited {
                    retry_after: Some(*retry_after),
                });
            }
        }
        if let Some(error) = state.errors.get(&key) {
            return Err(error.clone());
        }
        state
            .pages
            .get(&key)
            .cloned()
            .ok_or(PageFetchError::Status { status: 404 })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
