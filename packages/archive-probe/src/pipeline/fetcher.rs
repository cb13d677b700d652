//! Streaming range fetcher.
//!
//! For each planned coordinate: open the byte range, inflate and frame the
//! record incrementally, decode the payload to text and run windowed
//! extraction, emitting matches as each window commits. No payload is ever
//! held whole.
//!
//! Batches run in manifest order; inside a batch at most
//! `concurrency_limit` pipelines run at once. A failed coordinate never
//! affects its siblings, but a run of consecutive storage outages aborts
//! the job.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::emit::Emitter;
use super::record::{RecordDecoder, Utf8Decoder};
use super::window::WindowedExtractor;
use crate::context::JobContext;
use crate::error::{FetchError, FetchResult};
use crate::retry::RetryPolicy;
use crate::traits::extractor::Extractor;
use crate::traits::storage::ArchiveStorage;
use crate::types::config::EngineConfig;
use crate::types::manifest::{FetchManifest, PlannedFetch};
use crate::types::matches::{ExtractionMatch, RawMatch};
use crate::types::summary::FailureRecord;

/// Terminal result of one coordinate.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Completed { matches: usize, bytes: u64 },
    /// Already in the checkpoint at job start
    Skipped,
    /// Stopped by cancellation; not checkpointed
    Cancelled,
    Failed {
        record: FailureRecord,
        error: FetchError,
    },
}

/// Aggregate of a manifest run.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_completed: usize,
    /// Coordinates stopped or never started because of cancellation
    pub unfinished: usize,
    pub failures: Vec<FailureRecord>,
    /// Set when the job was aborted by consecutive storage outages
    pub aborted: Option<String>,
}

/// Runs fetch manifests against an [`ArchiveStorage`].
pub struct StreamFetcher {
    storage: Arc<dyn ArchiveStorage>,
    extractor: Arc<dyn Extractor>,
    concurrency_limit: usize,
    per_fetch_timeout: Duration,
    retry: RetryPolicy,
    max_consecutive_unavailable: usize,
    window_bytes: usize,
    window_overlap: usize,
    max_header_bytes: usize,
}

impl StreamFetcher {
    pub fn new(
        storage: Arc<dyn ArchiveStorage>,
        extractor: Arc<dyn Extractor>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            storage,
            extractor,
            concurrency_limit: config.concurrency_limit.max(1),
            per_fetch_timeout: config.per_fetch_timeout,
            retry: config.retry.clone(),
            max_consecutive_unavailable: config.max_consecutive_unavailable.max(1),
            window_bytes: config.window_bytes,
            window_overlap: config.window_overlap_bytes,
            max_header_bytes: config.max_header_bytes,
        }
    }

    /// Fetch every coordinate of the manifest.
    pub async fn execute(
        &self,
        manifest: &FetchManifest,
        ctx: &JobContext,
        emitter: &Emitter,
    ) -> FetchReport {
        let mut report = FetchReport::default();
        // Cancelled on abort; the caller's token stays untouched
        let scoped = ctx.child();
        let mut unavailable_streak = 0usize;

        for (index, batch) in manifest.batches.iter().enumerate() {
            if scoped.is_cancelled() {
                report.unfinished += batch.len();
                continue;
            }
            info!(
                batch = index,
                coordinates = batch.len(),
                bytes = batch.total_bytes(),
                "starting fetch batch"
            );

            let mut outcomes = stream::iter(&batch.fetches)
                .map(|planned| self.fetch_one(planned, &scoped, emitter))
                .buffer_unordered(self.concurrency_limit);

            while let Some(outcome) = outcomes.next().await {
                match outcome {
                    FetchOutcome::Completed { .. } => {
                        report.succeeded += 1;
                        unavailable_streak = 0;
                    }
                    FetchOutcome::Skipped => report.skipped_completed += 1,
                    FetchOutcome::Cancelled => report.unfinished += 1,
                    FetchOutcome::Failed { record, error } => {
                        report.failed += 1;
                        report.failures.push(record);
                        if matches!(error, FetchError::StorageUnavailable(_)) {
                            unavailable_streak += 1;
                        } else {
                            unavailable_streak = 0;
                        }
                        if unavailable_streak >= self.max_consecutive_unavailable
                            && report.aborted.is_none()
                        {
                            let reason = format!(
                                "storage unavailable for {} consecutive coordinates: {}",
                                unavailable_streak, error
                            );
                            error!(job_id = %ctx.job_id, storage = self.storage.name(), "{}", reason);
                            report.aborted = Some(reason);
                            scoped.cancel.cancel();
                        }
                    }
                }
            }
        }

        report
    }

    /// Fetch one coordinate, retrying transient failures.
    pub async fn fetch_one(
        &self,
        planned: &PlannedFetch,
        ctx: &JobContext,
        emitter: &Emitter,
    ) -> FetchOutcome {
        let coordinate = &planned.coordinate;
        let key = coordinate.checkpoint_key();
        if ctx.is_completed(&key) {
            debug!(coordinate = %coordinate, "already completed, skipping");
            return FetchOutcome::Skipped;
        }
        if ctx.is_cancelled() {
            return FetchOutcome::Cancelled;
        }

        let _in_flight = ctx.metrics.enter_fetch();
        // Matches already handed to the sink by earlier attempts
        let mut emitted = 0usize;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.attempt(planned, ctx, emitter, &mut emitted).await {
                Ok(bytes) => {
                    ctx.mark_complete(&key).await;
                    ctx.metrics.record_coordinate();
                    debug!(coordinate = %coordinate, bytes, matches = emitted, attempt, "coordinate complete");
                    return FetchOutcome::Completed {
                        matches: emitted,
                        bytes,
                    };
                }
                Err(FetchError::Cancelled) => return FetchOutcome::Cancelled,
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    ctx.metrics.record_retry();
                    let delay = self.retry.backoff(attempt);
                    debug!(
                        coordinate = %coordinate,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "retrying coordinate"
                    );
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return FetchOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(
                        coordinate = %coordinate,
                        url = %planned.source_url,
                        attempts = attempt,
                        error = %e,
                        "coordinate failed"
                    );
                    let mut record = FailureRecord::from_fetch_error(coordinate.to_string(), &e, attempt);
                    record.detail = format!("{} ({})", record.detail, planned.source_url);
                    return FetchOutcome::Failed { record, error: e };
                }
            }
        }
    }

    /// One pass over the byte range. Returns the number of storage bytes
    /// read.
    async fn attempt(
        &self,
        planned: &PlannedFetch,
        ctx: &JobContext,
        emitter: &Emitter,
        emitted: &mut usize,
    ) -> FetchResult<u64> {
        let coordinate = &planned.coordinate;
        let open = self.storage.fetch(
            &coordinate.archive_id,
            coordinate.offset,
            coordinate.compressed_length,
        );
        let mut stream = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(FetchError::Cancelled),
            opened = tokio::time::timeout(self.per_fetch_timeout, open) => opened
                .map_err(|_| FetchError::Transient(format!("timed out opening {}", coordinate)))??,
        };

        let mut decoder = RecordDecoder::new(self.max_header_bytes);
        let mut utf8 = Utf8Decoder::new();
        let mut windows = WindowedExtractor::new(self.window_bytes, self.window_overlap);
        let mut cursor = MatchCursor::new(planned, emitter, emitted);
        let mut bytes = 0u64;

        // Read to the end of the range even once the payload is complete:
        // a gzip member's trailer follows the last payload byte
        loop {
            let next = tokio::time::timeout(self.per_fetch_timeout, stream.next())
                .await
                .map_err(|_| FetchError::Transient(format!("read timed out for {}", coordinate)))?;
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            bytes += chunk.len() as u64;
            ctx.metrics.add_bytes(chunk.len() as u64);

            let payload = decoder.feed(&chunk)?;
            if !payload.is_empty() {
                let text = utf8.decode(&payload);
                cursor.emit(windows.push(&text, self.extractor.as_ref())).await?;
            }
            if ctx.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
        }

        let mut text = utf8.decode(&decoder.finish()?);
        text.push_str(&utf8.finish());
        cursor.emit(windows.push(&text, self.extractor.as_ref())).await?;
        cursor.emit(windows.finish(self.extractor.as_ref())).await?;

        if let Some(status) = decoder.meta().http_status {
            debug!(coordinate = %coordinate, status, payload_bytes = windows.consumed(), "record decoded");
        }
        Ok(bytes)
    }
}

/// Emits matches of one attempt, skipping those an earlier attempt already
/// delivered. Extraction is deterministic, so the first `emitted` matches
/// of a retry are the same ones.
struct MatchCursor<'a> {
    planned: &'a PlannedFetch,
    emitter: &'a Emitter,
    emitted: &'a mut usize,
    seen: usize,
}

impl<'a> MatchCursor<'a> {
    fn new(planned: &'a PlannedFetch, emitter: &'a Emitter, emitted: &'a mut usize) -> Self {
        Self {
            planned,
            emitter,
            emitted,
            seen: 0,
        }
    }

    async fn emit(&mut self, found: Vec<(u64, RawMatch)>) -> FetchResult<()> {
        for (payload_offset, raw) in found {
            self.seen += 1;
            if self.seen <= *self.emitted {
                continue;
            }
            let m = ExtractionMatch::from_raw(
                raw,
                payload_offset,
                self.planned.source_url.clone(),
                self.planned.source_tag.clone(),
                Some(self.planned.coordinate.clone()),
            );
            if !self.emitter.emit_match(m).await {
                return Err(FetchError::Permanent("result sink closed".to_string()));
            }
            *self.emitted += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoints::MemoryCheckpoint;
    use crate::pipeline::emit::SinkDriver;
    use crate::pipeline::planner::pack_batches;
    use crate::sinks::MemorySink;
    use crate::testing::{gzip_record, warc_record, MockExtractor, MockStorage};
    use crate::types::coordinate::ArchiveCoordinate;
    use tokio_util::sync::CancellationToken;

    fn planned(coordinate: ArchiveCoordinate) -> PlannedFetch {
        PlannedFetch {
            source_url: format!("http://example.com/{}", coordinate.offset),
            source_tag: "curated".to_string(),
            coordinate,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_retry(
                RetryPolicy::default()
                    .with_max_attempts(3)
                    .with_initial_backoff(Duration::from_millis(1)),
            )
            .with_window(64, 16)
    }

    async fn run(
        storage: MockStorage,
        coordinates: Vec<ArchiveCoordinate>,
        config: &EngineConfig,
    ) -> (FetchReport, Arc<MemorySink>) {
        let ctx = JobContext::new("t", Arc::new(MemoryCheckpoint::new()), CancellationToken::new())
            .await
            .unwrap();
        let sink = Arc::new(MemorySink::new());
        let (driver, emitter) = SinkDriver::spawn(
            sink.clone(),
            8,
            RetryPolicy::default(),
            ctx.job_id,
            "t",
            ctx.metrics.clone(),
        );

        let manifest = FetchManifest {
            batches: pack_batches(coordinates.into_iter().map(planned).collect(), u64::MAX),
            ..Default::default()
        };
        let fetcher = StreamFetcher::new(Arc::new(storage), Arc::new(MockExtractor::phones()), config);
        let report = fetcher.execute(&manifest, &ctx, &emitter).await;
        drop(emitter);
        driver.close().await;
        (report, sink)
    }

    #[tokio::test]
    async fn test_matches_carry_provenance() {
        let storage = MockStorage::new();
        let coord = storage.add_record("a.warc.gz", &warc_record("http://example.com/0", "call 555-0100 or 555-0199"));

        let (report, sink) = run(storage, vec![coord.clone()], &config()).await;
        assert_eq!(report.succeeded, 1);

        let matches = sink.matches();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].value, "555-0100");
        assert_eq!(matches[0].source_tag, "curated");
        assert_eq!(matches[0].coordinate.as_ref(), Some(&coord));
        assert_eq!(matches[0].payload_offset, 5);
        assert!(matches[0].payload_offset < matches[1].payload_offset);
    }

    #[tokio::test]
    async fn test_gzip_record_in_small_chunks() {
        let record = gzip_record(&warc_record("http://example.com/0", "call 555-0100 or 555-0199"));

        for chunk in [1, 2, 3, 5, 8, 4096] {
            let storage = MockStorage::new().with_chunk_size(chunk);
            let coord = storage.add_record("a.warc.gz", &record);

            let (report, sink) = run(storage, vec![coord], &config()).await;
            assert_eq!(report.succeeded, 1, "chunk size {}: {:?}", chunk, report.failures);
            assert_eq!(sink.matches().len(), 2, "chunk size {}", chunk);
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_without_duplicates() {
        let storage = MockStorage::new();
        let body = "555-0001 ".repeat(30);
        let coord = storage.add_record("a.warc.gz", &warc_record("http://example.com/0", &body));
        // First attempt breaks midway through the stream
        let storage = storage.fail_midway(&coord, 1);

        let (report, sink) = run(storage, vec![coord], &config()).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(sink.matches().len(), 30);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let storage = MockStorage::new();
        let coord = storage.add_record("a.warc.gz", &warc_record("http://example.com/0", "x"));
        let storage = storage.fail_with(&coord, FetchError::Permanent("404".into()));

        let (report, _) = run(storage.clone(), vec![coord.clone()], &config()).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].attempts, 1);
        assert_eq!(storage.fetch_count(&coord), 1);
    }

    #[tokio::test]
    async fn test_decode_failure_isolated() {
        let storage = MockStorage::new();
        let good = storage.add_record("a.warc.gz", &warc_record("http://example.com/0", "555-0100"));
        let bad = storage.add_raw("a.warc.gz", b"WARC/1.0\r\nContent-Length: 900\r\n\r\ntoo short");

        let (report, sink) = run(storage, vec![good, bad], &config()).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(
            report.failures[0].reason,
            crate::types::summary::FailureReason::Decode
        );
        assert_eq!(sink.matches().len(), 1);
    }
}
