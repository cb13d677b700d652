//! Bounded-parallel domain crawling.
//!
//! Seed domains are partitioned over `crawl_workers` workers by a stable
//! hash, so a restarted job sends every domain to the same worker. Each
//! worker crawls up to `domains_per_worker` domains at once; each domain
//! is a breadth-first walk capped by depth and attempted pages.

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

use super::emit::Emitter;
use super::links::{same_site_links, site_host};
use super::target::normalize_url;
use super::window::WindowedExtractor;
use crate::context::JobContext;
use crate::error::PageFetchError;
use crate::retry::RetryPolicy;
use crate::traits::extractor::Extractor;
use crate::traits::page_fetcher::{FetchedPage, PageFetcher};
use crate::types::config::EngineConfig;
use crate::types::crawl::{CrawlResult, CrawlTask, DomainState};
use crate::types::matches::ExtractionMatch;
use crate::types::summary::{DomainTally, FailureReason, FailureRecord};

/// Source tag stamped on matches found by crawling.
pub const CRAWL_SOURCE_TAG: &str = "crawl";

/// Aggregate of a crawl run.
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub pages_succeeded: usize,
    pub pages_failed: usize,
    pub domains: DomainTally,
    pub failures: Vec<FailureRecord>,
}

impl CrawlReport {
    fn merge(&mut self, other: CrawlReport) {
        self.pages_succeeded += other.pages_succeeded;
        self.pages_failed += other.pages_failed;
        self.domains.completed += other.domains.completed;
        self.domains.failed += other.domains.failed;
        self.domains.skipped_completed += other.domains.skipped_completed;
        self.domains.unfinished += other.domains.unfinished;
        self.failures.extend(other.failures);
    }
}

enum PageFailure {
    Cancelled,
    Failed { error: PageFetchError, attempts: u32 },
}

/// Schedules domain crawls over a fixed worker pool.
#[derive(Clone)]
pub struct CrawlScheduler {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn Extractor>,
    workers: usize,
    domains_per_worker: usize,
    max_depth: u32,
    max_pages: usize,
    retry: RetryPolicy,
    page_timeout: Duration,
    window_bytes: usize,
    window_overlap: usize,
}

impl CrawlScheduler {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn Extractor>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            workers: config.crawl_workers.max(1),
            domains_per_worker: config.domains_per_worker.max(1),
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            retry: config.retry.clone(),
            page_timeout: config.per_fetch_timeout,
            window_bytes: config.window_bytes,
            window_overlap: config.window_overlap_bytes,
        }
    }

    /// Worker owning `seed` among `workers` workers.
    pub fn partition_of(seed: &str, workers: usize) -> usize {
        let digest = Sha256::digest(seed.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % workers.max(1) as u64) as usize
    }

    /// Crawl every seed. Invalid seeds are recorded as failed domains.
    pub async fn run(&self, seeds: &[String], ctx: &JobContext, emitter: &Emitter) -> CrawlReport {
        let mut report = CrawlReport::default();
        let mut partitions: Vec<Vec<CrawlTask>> = vec![Vec::new(); self.workers];
        let mut seen = HashSet::new();

        for seed in seeds {
            let Some(normalized) = normalize_url(seed) else {
                warn!(seed = %seed, "invalid seed domain");
                report.domains.failed += 1;
                report.failures.push(FailureRecord::new(
                    seed.clone(),
                    FailureReason::DomainFailed,
                    "seed is not a crawlable URL",
                ));
                continue;
            };
            if !seen.insert(normalized.clone()) {
                continue;
            }
            let worker = Self::partition_of(&normalized, self.workers);
            partitions[worker].push(CrawlTask::new(normalized, self.max_depth, self.max_pages));
        }

        info!(
            seeds = seen.len(),
            workers = self.workers,
            domains_per_worker = self.domains_per_worker,
            max_depth = self.max_depth,
            max_pages = self.max_pages,
            "starting crawl"
        );

        let handles: Vec<_> = partitions
            .into_iter()
            .enumerate()
            .filter(|(_, tasks)| !tasks.is_empty())
            .map(|(worker, tasks)| {
                let scheduler = self.clone();
                let ctx = ctx.clone();
                let emitter = emitter.clone();
                let span = info_span!("crawl_worker", worker, job_id = %ctx.job_id);
                tokio::spawn(
                    async move { scheduler.run_worker(tasks, &ctx, &emitter).await }.instrument(span),
                )
            })
            .collect();

        for handle in handles {
            match handle.await {
                Ok(worker_report) => report.merge(worker_report),
                Err(e) => warn!(error = %e, "crawl worker task failed"),
            }
        }
        report
    }

    async fn run_worker(&self, tasks: Vec<CrawlTask>, ctx: &JobContext, emitter: &Emitter) -> CrawlReport {
        debug!(domains = tasks.len(), "worker started");
        let mut report = CrawlReport::default();
        let mut domains = stream::iter(tasks)
            .map(|task| self.crawl_domain(task, ctx, emitter))
            .buffer_unordered(self.domains_per_worker);

        while let Some(domain_report) = domains.next().await {
            report.merge(domain_report);
        }
        debug!(
            pages = report.pages_succeeded,
            failed_pages = report.pages_failed,
            "worker finished"
        );
        report
    }

    /// Breadth-first crawl of one domain.
    async fn crawl_domain(&self, mut task: CrawlTask, ctx: &JobContext, emitter: &Emitter) -> CrawlReport {
        let mut report = CrawlReport::default();
        let key = task.checkpoint_key();
        if ctx.is_completed(&key) {
            debug!(seed = %task.seed_domain, "domain already completed, skipping");
            report.domains.skipped_completed += 1;
            return report;
        }
        let Some(site) = site_host(&task.seed_domain) else {
            report.domains.failed += 1;
            report.failures.push(FailureRecord::new(
                task.seed_domain.clone(),
                FailureReason::DomainFailed,
                "seed has no host",
            ));
            return report;
        };

        let mut queue = VecDeque::from([(task.seed_domain.clone(), 0u32)]);
        let mut visited = HashSet::from([task.seed_domain.clone()]);
        let mut attempted = 0usize;

        while let Some((url, depth)) = queue.pop_front() {
            if attempted >= task.max_pages {
                break;
            }
            if ctx.is_cancelled() {
                report.domains.unfinished += 1;
                return report;
            }
            attempted += 1;
            task.transition(DomainState::Fetching);

            match self.fetch_page(&url, ctx).await {
                Ok(page) => {
                    ctx.metrics.record_page();
                    report.pages_succeeded += 1;

                    if depth < task.max_depth && page.is_html() {
                        for link in same_site_links(&page.final_url, &page.body, &site) {
                            if visited.insert(link.clone()) {
                                queue.push_back((link, depth + 1));
                            }
                        }
                    }

                    let extracted = self.extract(&url, &page.body);
                    debug!(url = %url, depth, matches = extracted.len(), queued = queue.len(), "page crawled");
                    let result = CrawlResult {
                        url: url.clone(),
                        depth,
                        status_code: page.status_code,
                        content: page.body,
                        extracted,
                    };
                    if !emitter.emit_crawl(result).await {
                        warn!(url = %url, "result sink closed");
                    }
                    task.transition(DomainState::PageComplete);
                }
                Err(PageFailure::Cancelled) => {
                    report.domains.unfinished += 1;
                    return report;
                }
                Err(PageFailure::Failed { error, attempts }) if depth == 0 => {
                    warn!(seed = %task.seed_domain, attempts, error = %error, "seed root failed");
                    task.transition(DomainState::DomainFailed);
                    report.domains.failed += 1;
                    report.pages_failed += 1;
                    report.failures.push(FailureRecord {
                        target: task.seed_domain.clone(),
                        reason: FailureReason::DomainFailed,
                        detail: error.to_string(),
                        attempts,
                    });
                    return report;
                }
                Err(PageFailure::Failed { error, attempts }) => {
                    debug!(url = %url, attempts, error = %error, "page failed");
                    report.pages_failed += 1;
                    report
                        .failures
                        .push(FailureRecord::from_page_error(url, &error, attempts));
                    task.transition(DomainState::PageComplete);
                }
            }
        }

        task.transition(DomainState::DomainComplete);
        ctx.mark_complete(&key).await;
        report.domains.completed += 1;
        info!(
            seed = %task.seed_domain,
            pages = report.pages_succeeded,
            failed_pages = report.pages_failed,
            "domain complete"
        );
        report
    }

    /// Fetch one page. Rate-limit signals wait and retry without using up
    /// attempts; transient errors retry with backoff.
    async fn fetch_page(&self, url: &str, ctx: &JobContext) -> Result<FetchedPage, PageFailure> {
        let mut attempts = 0u32;
        let mut rate_limited = 0u32;

        loop {
            if ctx.is_cancelled() {
                return Err(PageFailure::Cancelled);
            }
            attempts += 1;
            // A request in flight runs to completion; cancellation is seen
            // before the next one
            let result = tokio::time::timeout(self.page_timeout, self.fetcher.fetch(url))
                .await
                .unwrap_or_else(|_| Err(PageFetchError::Transient(format!("timed out fetching {}", url))));

            let delay = match result {
                Ok(page) => return Ok(page),
                Err(PageFetchError::RateLimited { retry_after }) => {
                    attempts -= 1;
                    rate_limited += 1;
                    let delay = retry_after.unwrap_or_else(|| self.retry.backoff(rate_limited));
                    debug!(url = %url, delay_ms = delay.as_millis() as u64, "rate limited, waiting");
                    delay
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempts) => {
                    ctx.metrics.record_retry();
                    self.retry.backoff(attempts)
                }
                Err(error) => return Err(PageFailure::Failed { error, attempts }),
            };

            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(PageFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn extract(&self, url: &str, body: &str) -> Vec<ExtractionMatch> {
        let mut windows = WindowedExtractor::new(self.window_bytes, self.window_overlap);
        let mut found = windows.push(body, self.extractor.as_ref());
        found.extend(windows.finish(self.extractor.as_ref()));
        found
            .into_iter()
            .map(|(offset, raw)| ExtractionMatch::from_raw(raw, offset, url, CRAWL_SOURCE_TAG, None))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoints::MemoryCheckpoint;
    use crate::pipeline::emit::SinkDriver;
    use crate::sinks::MemorySink;
    use crate::testing::{MockExtractor, MockPageFetcher};
    use tokio_util::sync::CancellationToken;

    async fn crawl(
        fetcher: MockPageFetcher,
        seeds: &[&str],
        config: EngineConfig,
        checkpoint: MemoryCheckpoint,
    ) -> (CrawlReport, Arc<MemorySink>) {
        let ctx = JobContext::new("crawl", Arc::new(checkpoint), CancellationToken::new())
            .await
            .unwrap();
        let sink = Arc::new(MemorySink::new());
        let (driver, emitter) = SinkDriver::spawn(
            sink.clone(),
            16,
            RetryPolicy::default(),
            ctx.job_id,
            "crawl",
            ctx.metrics.clone(),
        );
        let scheduler = CrawlScheduler::new(Arc::new(fetcher), Arc::new(MockExtractor::phones()), &config);
        let seeds: Vec<String> = seeds.iter().map(|s| s.to_string()).collect();
        let report = scheduler.run(&seeds, &ctx, &emitter).await;
        drop(emitter);
        driver.close().await;
        (report, sink)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(2)
            .with_initial_backoff(Duration::from_millis(1))
    }

    #[test]
    fn test_partition_is_stable() {
        let a = CrawlScheduler::partition_of("https://example.com", 4);
        assert_eq!(a, CrawlScheduler::partition_of("https://example.com", 4));
        assert!(a < 4);
        assert_eq!(CrawlScheduler::partition_of("https://example.com", 1), 0);
    }

    #[tokio::test]
    async fn test_max_pages_caps_attempts() {
        let links: String = (0..10)
            .map(|i| format!(r#"<a href="/p{}">p</a>"#, i))
            .collect();
        let fetcher = MockPageFetcher::new().with_page("https://example.com", &links);

        let config = EngineConfig::default().with_crawl_limits(3, 4).with_retry(fast_retry());
        let (report, _) = crawl(fetcher.clone(), &["https://example.com"], config, MemoryCheckpoint::new()).await;

        assert_eq!(fetcher.fetch_count(), 4);
        assert_eq!(report.domains.completed, 1);
    }

    #[tokio::test]
    async fn test_root_failure_fails_domain() {
        let fetcher = MockPageFetcher::new().with_error("https://down.example", PageFetchError::Status { status: 500 });
        let (report, sink) = crawl(
            fetcher,
            &["https://down.example"],
            EngineConfig::default().with_retry(fast_retry()),
            MemoryCheckpoint::new(),
        )
        .await;

        assert_eq!(report.domains.failed, 1);
        assert_eq!(report.failures[0].reason, FailureReason::DomainFailed);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_child_page_failure_keeps_domain() {
        let fetcher = MockPageFetcher::new()
            .with_page("https://example.com", r#"<a href="/broken">b</a><a href="/ok">o</a>"#)
            .with_page("https://example.com/ok", "call 555-0100")
            .with_error("https://example.com/broken", PageFetchError::Status { status: 404 });

        let (report, sink) = crawl(
            fetcher,
            &["https://example.com"],
            EngineConfig::default().with_retry(fast_retry()),
            MemoryCheckpoint::new(),
        )
        .await;

        assert_eq!(report.domains.completed, 1);
        assert_eq!(report.pages_succeeded, 2);
        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.failures[0].reason, FailureReason::PageFailed);

        let crawled = sink.crawl_results();
        let ok = crawled.iter().find(|c| c.url == "https://example.com/ok").unwrap();
        assert_eq!(ok.depth, 1);
        assert_eq!(ok.extracted.len(), 1);
        assert_eq!(ok.extracted[0].source_tag, CRAWL_SOURCE_TAG);
    }

    #[tokio::test]
    async fn test_rate_limit_does_not_consume_attempts() {
        let fetcher = MockPageFetcher::new()
            .with_page("https://example.com", "hello")
            .rate_limited("https://example.com", 3, Duration::from_millis(1));

        let config = EngineConfig::default().with_retry(RetryPolicy::none());
        let (report, _) = crawl(fetcher.clone(), &["https://example.com"], config, MemoryCheckpoint::new()).await;

        assert_eq!(report.domains.completed, 1);
        assert_eq!(fetcher.fetch_count(), 4);
    }

    #[tokio::test]
    async fn test_completed_domains_are_skipped() {
        let fetcher = MockPageFetcher::new()
            .with_page("https://a.example", "a")
            .with_page("https://b.example", "b");
        let checkpoint = MemoryCheckpoint::with_keys(["domain:https://a.example"]);

        let (report, _) = crawl(
            fetcher.clone(),
            &["https://a.example/", "https://b.example/"],
            EngineConfig::default(),
            checkpoint.clone(),
        )
        .await;

        assert_eq!(report.domains.skipped_completed, 1);
        assert_eq!(report.domains.completed, 1);
        assert_eq!(fetcher.requested(), vec!["https://b.example".to_string()]);
        assert!(checkpoint.contains("domain:https://b.example"));
    }
}
