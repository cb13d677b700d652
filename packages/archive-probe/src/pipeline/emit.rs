//! Bounded delivery to the result sink.
//!
//! Producers hold an [`Emitter`] and push records into a bounded channel.
//! A single forwarder task drains it into the [`ResultSink`], so a slow
//! sink slows producers down instead of growing memory.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics::JobMetrics;
use crate::retry::RetryPolicy;
use crate::traits::sink::ResultSink;
use crate::types::crawl::CrawlResult;
use crate::types::matches::{ExtractionMatch, SinkItem, SinkRecord};

/// What the forwarder managed to deliver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Producer handle. Cheap to clone; the forwarder stops once every clone
/// is dropped.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::Sender<SinkRecord>,
    job_id: Uuid,
    output_tag: String,
    metrics: Arc<JobMetrics>,
}

impl Emitter {
    /// Queue one extraction match. Waits while the queue is full.
    ///
    /// Returns `false` if the forwarder is gone.
    pub async fn emit_match(&self, m: ExtractionMatch) -> bool {
        let sent = self.send(SinkItem::Match(m)).await;
        if sent {
            self.metrics.record_match();
        }
        sent
    }

    /// Queue one crawl result (its extracted matches count as emitted).
    pub async fn emit_crawl(&self, result: CrawlResult) -> bool {
        let matches = result.extracted.len();
        let sent = self.send(SinkItem::Crawl(result)).await;
        if sent {
            for _ in 0..matches {
                self.metrics.record_match();
            }
        }
        sent
    }

    async fn send(&self, item: SinkItem) -> bool {
        let record = SinkRecord {
            job_id: self.job_id,
            output_tag: self.output_tag.clone(),
            item,
        };
        self.tx.send(record).await.is_ok()
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("job_id", &self.job_id)
            .field("queue_free", &self.tx.capacity())
            .finish()
    }
}

/// Owns the forwarder task.
pub struct SinkDriver {
    handle: JoinHandle<DeliveryStats>,
}

impl SinkDriver {
    /// Start the forwarder and return the producer handle.
    pub fn spawn(
        sink: Arc<dyn ResultSink>,
        capacity: usize,
        retry: RetryPolicy,
        job_id: Uuid,
        output_tag: impl Into<String>,
        metrics: Arc<JobMetrics>,
    ) -> (Self, Emitter) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(forward(rx, sink, retry));
        let emitter = Emitter {
            tx,
            job_id,
            output_tag: output_tag.into(),
            metrics,
        };
        (Self { handle }, emitter)
    }

    /// Wait until every queued record has been offered to the sink and the
    /// sink has been flushed. All emitters must be dropped first.
    pub async fn close(self) -> DeliveryStats {
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "sink forwarder task failed");
                DeliveryStats::default()
            }
        }
    }
}

async fn forward(
    mut rx: mpsc::Receiver<SinkRecord>,
    sink: Arc<dyn ResultSink>,
    retry: RetryPolicy,
) -> DeliveryStats {
    let mut stats = DeliveryStats::default();
    while let Some(record) = rx.recv().await {
        if deliver(sink.as_ref(), record, &retry).await {
            stats.delivered += 1;
        } else {
            stats.dropped += 1;
        }
    }

    if let Err(e) = sink.flush().await {
        warn!(error = %e, "sink flush failed");
    }
    debug!(delivered = stats.delivered, dropped = stats.dropped, "sink drained");
    stats
}

async fn deliver(sink: &dyn ResultSink, record: SinkRecord, retry: &RetryPolicy) -> bool {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match sink.accept(record.clone()).await {
            Ok(()) => return true,
            Err(e) if e.is_retryable() && retry.should_retry(attempt) => {
                let delay = retry.backoff(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "sink busy, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(error = %e, attempts = attempt, "dropping sink record");
                return false;
            }
        }
    }
}
