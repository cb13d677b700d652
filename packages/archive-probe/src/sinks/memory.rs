//! In-memory result sink.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::SinkError;
use crate::traits::sink::ResultSink;
use crate::types::crawl::CrawlResult;
use crate::types::matches::{ExtractionMatch, SinkRecord};

/// Keeps every accepted record in memory.
///
/// Clones share the same storage. Can be told to reject its first few
/// records (retryably) or to accept slowly, which exercises the driver's
/// retry and backpressure paths.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<RwLock<Vec<SinkRecord>>>,
    reject_remaining: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the first `n` offers with a retryable error.
    pub fn rejecting_first(self, n: usize) -> Self {
        self.reject_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep this long inside every accept.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Everything accepted so far, in arrival order.
    pub fn records(&self) -> Vec<SinkRecord> {
        self.records.read().unwrap().clone()
    }

    pub fn matches(&self) -> Vec<ExtractionMatch> {
        self.records
            .read()
            .unwrap()
            .iter()
            .filter_map(|r| r.as_match().cloned())
            .collect()
    }

    pub fn crawl_results(&self) -> Vec<CrawlResult> {
        self.records
            .read()
            .unwrap()
            .iter()
            .filter_map(|r| r.as_crawl().cloned())
            .collect()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn accept(&self, record: SinkRecord) -> Result<(), SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let rejected = self
            .reject_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(SinkError::Rejected { retryable: true });
        }
        self.records.write().unwrap().push(record);
        Ok(())
    }
}
