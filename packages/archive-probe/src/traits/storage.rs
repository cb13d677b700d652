//! Archive storage transport.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::FetchResult;

/// A stream of raw (possibly compressed) record bytes.
pub type ByteStream = BoxStream<'static, FetchResult<Bytes>>;

/// Range access to archive files.
///
/// Implementations should reuse a bounded connection pool across calls;
/// the fetcher bounds how many ranges are open at once.
#[async_trait]
pub trait ArchiveStorage: Send + Sync {
    /// Open `length` bytes of `archive_id` starting at `offset`.
    ///
    /// Errors must be classified: `Transient` for timeouts and resets,
    /// `Permanent` for missing files or invalid ranges, and
    /// `StorageUnavailable` when the transport itself is down.
    async fn fetch(&self, archive_id: &str, offset: u64, length: u64) -> FetchResult<ByteStream>;

    /// Storage name for logging.
    fn name(&self) -> &str {
        "unknown"
    }
}
