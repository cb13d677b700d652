//! Job orchestration.
//!
//! [`ProbeEngine`] wires the collaborators together and runs one job from
//! descriptor to [`JobSummary`]. Every job returns a summary, including
//! jobs rejected for bad configuration and jobs that were cancelled or
//! aborted.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::crawl::CrawlScheduler;
use super::emit::SinkDriver;
use super::fetcher::StreamFetcher;
use super::planner::FetchPlanner;
use super::target::{ExclusionFilter, TargetResolver};
use crate::checkpoints::MemoryCheckpoint;
use crate::context::JobContext;
use crate::error::ConfigError;
use crate::traits::checkpoint::CheckpointStore;
use crate::traits::extractor::Extractor;
use crate::traits::page_fetcher::PageFetcher;
use crate::traits::resolver::CoordinateResolver;
use crate::traits::sink::ResultSink;
use crate::traits::source::CandidateSource;
use crate::traits::storage::ArchiveStorage;
use crate::types::config::EngineConfig;
use crate::types::job::{JobDescriptor, JobMode};
use crate::types::locator::{CandidateQuery, SourceBatch};
use crate::types::summary::{DomainTally, FailureRecord, JobOutcome, JobSummary};

/// Tag given to candidates listed directly in a job descriptor.
pub const JOB_SOURCE_TAG: &str = "job";

/// Runs targeted and crawl jobs.
///
/// # Example
///
/// ```rust,ignore
/// use archive_probe::{EngineConfig, JobDescriptor, ProbeEngine};
/// use archive_probe::testing::{MockExtractor, MockResolver, MockStorage};
/// use archive_probe::sinks::MemorySink;
///
/// let engine = ProbeEngine::new(EngineConfig::default(), Arc::new(MockExtractor::phones()), Arc::new(MemorySink::new()))
///     .with_resolver(Arc::new(MockResolver::new()))
///     .with_storage(Arc::new(MockStorage::new()));
///
/// let summary = engine
///     .run(&JobDescriptor::targeted(["example.com/contact"]), CancellationToken::new())
///     .await;
/// ```
pub struct ProbeEngine {
    config: EngineConfig,
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn ResultSink>,
    checkpoint: Arc<dyn CheckpointStore>,
    resolver: Option<Arc<dyn CoordinateResolver>>,
    storage: Option<Arc<dyn ArchiveStorage>>,
    page_fetcher: Option<Arc<dyn PageFetcher>>,
    sources: Vec<Arc<dyn CandidateSource>>,
    exclusion: Option<ExclusionFilter>,
}

impl ProbeEngine {
    /// Create an engine with an in-memory checkpoint and no transports.
    pub fn new(config: EngineConfig, extractor: Arc<dyn Extractor>, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            config,
            extractor,
            sink,
            checkpoint: Arc::new(MemoryCheckpoint::new()),
            resolver: None,
            storage: None,
            page_fetcher: None,
            sources: Vec::new(),
            exclusion: None,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn CoordinateResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn ArchiveStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_page_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.page_fetcher = Some(fetcher);
        self
    }

    /// Add an intelligence source consulted by [`ProbeEngine::discover`].
    pub fn with_source(mut self, source: Arc<dyn CandidateSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Drop candidates whose normalized URL matches `exclusion`.
    pub fn with_exclusion(mut self, exclusion: ExclusionFilter) -> Self {
        self.exclusion = Some(exclusion);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a job in the mode its descriptor names.
    pub async fn run(&self, job: &JobDescriptor, cancel: CancellationToken) -> JobSummary {
        match job.mode {
            JobMode::Targeted => self.run_targeted(job, cancel).await,
            JobMode::Crawl => self.run_crawl(job, cancel).await,
        }
    }

    /// Targeted job over the candidates listed in the descriptor.
    pub async fn run_targeted(&self, job: &JobDescriptor, cancel: CancellationToken) -> JobSummary {
        let batches = vec![SourceBatch::new(JOB_SOURCE_TAG, job.candidates_or_seeds.clone())];
        self.targeted(job, batches, Vec::new(), cancel).await
    }

    /// Targeted job over candidates gathered from every registered source
    /// (plus any listed in the descriptor).
    pub async fn discover(
        &self,
        query: &CandidateQuery,
        job: &JobDescriptor,
        cancel: CancellationToken,
    ) -> JobSummary {
        let resolver = TargetResolver::new(self.config.source_priority.clone());
        let gathered = resolver.gather(&self.sources, query).await;
        let mut batches = gathered.batches;
        if !job.candidates_or_seeds.is_empty() {
            batches.push(SourceBatch::new(JOB_SOURCE_TAG, job.candidates_or_seeds.clone()));
        }
        self.targeted(job, batches, gathered.source_failures, cancel).await
    }

    async fn targeted(
        &self,
        job: &JobDescriptor,
        batches: Vec<SourceBatch>,
        source_failures: Vec<FailureRecord>,
        cancel: CancellationToken,
    ) -> JobSummary {
        let started = Instant::now();
        let config = self.config.for_job(job);
        let (resolver, storage) = match self.targeted_collaborators(&config) {
            Ok(pair) => pair,
            Err(e) => return rejected(job, JobMode::Targeted, e.to_string(), started),
        };
        let ctx = match JobContext::new(job.output_tag.clone(), self.checkpoint.clone(), cancel).await {
            Ok(ctx) => ctx,
            Err(e) => return rejected(job, JobMode::Targeted, e.to_string(), started),
        };

        let span = info_span!("job", job_id = %ctx.job_id, mode = "targeted", tag = %ctx.output_tag);
        async move {
            let mut summary = JobSummary::new(ctx.job_id, ctx.output_tag.clone(), JobMode::Targeted);
            summary.failure_reasons = source_failures;
            info!(batches = batches.len(), completed_keys = ctx.completed_count(), "targeted job started");

            let targets = TargetResolver::new(config.source_priority.clone())
                .resolve(batches, self.exclusion.as_ref());
            summary.duplicates = targets.duplicates;
            summary.excluded = targets.excluded;
            summary.invalid_candidates = targets.invalid;

            let plan = FetchPlanner::new(resolver, &config)
                .plan(&targets.candidates)
                .await;
            summary.missing_coordinates = plan.missing_coordinates;
            summary.failure_reasons.extend(plan.failures);
            summary.estimate = Some(plan.manifest.estimate.clone());

            let (driver, emitter) = SinkDriver::spawn(
                self.sink.clone(),
                config.sink_queue_capacity,
                config.retry.clone(),
                ctx.job_id,
                ctx.output_tag.clone(),
                ctx.metrics.clone(),
            );
            let report = StreamFetcher::new(storage, self.extractor.clone(), &config)
                .execute(&plan.manifest, &ctx, &emitter)
                .await;
            drop(emitter);
            let delivery = driver.close().await;

            summary.succeeded = report.succeeded;
            summary.failed = report.failed;
            summary.skipped_completed = report.skipped_completed;
            summary.unfinished = report.unfinished;
            summary.failure_reasons.extend(report.failures);
            summary.sink_dropped = delivery.dropped;
            summary.outcome = match report.aborted {
                Some(reason) => JobOutcome::Aborted { reason },
                None if ctx.is_cancelled() => JobOutcome::Cancelled,
                None => JobOutcome::Completed,
            };
            finish(&ctx, summary, started)
        }
        .instrument(span)
        .await
    }

    /// Crawl job over the seed domains listed in the descriptor.
    pub async fn run_crawl(&self, job: &JobDescriptor, cancel: CancellationToken) -> JobSummary {
        let started = Instant::now();
        let config = self.config.for_job(job);
        let fetcher = match self.crawl_collaborators(&config) {
            Ok(fetcher) => fetcher,
            Err(e) => return rejected(job, JobMode::Crawl, e.to_string(), started),
        };
        let ctx = match JobContext::new(job.output_tag.clone(), self.checkpoint.clone(), cancel).await {
            Ok(ctx) => ctx,
            Err(e) => return rejected(job, JobMode::Crawl, e.to_string(), started),
        };

        let span = info_span!("job", job_id = %ctx.job_id, mode = "crawl", tag = %ctx.output_tag);
        async move {
            let mut summary = JobSummary::new(ctx.job_id, ctx.output_tag.clone(), JobMode::Crawl);
            info!(seeds = job.candidates_or_seeds.len(), "crawl job started");

            let (driver, emitter) = SinkDriver::spawn(
                self.sink.clone(),
                config.sink_queue_capacity,
                config.retry.clone(),
                ctx.job_id,
                ctx.output_tag.clone(),
                ctx.metrics.clone(),
            );
            let report = CrawlScheduler::new(fetcher, self.extractor.clone(), &config)
                .run(&job.candidates_or_seeds, &ctx, &emitter)
                .await;
            drop(emitter);
            let delivery = driver.close().await;

            summary.succeeded = report.pages_succeeded;
            summary.failed = report.pages_failed;
            summary.skipped_completed = report.domains.skipped_completed;
            summary.unfinished = report.domains.unfinished;
            summary.failure_reasons = report.failures;
            summary.sink_dropped = delivery.dropped;
            summary.domains = Some(report.domains);
            summary.outcome = if ctx.is_cancelled() {
                JobOutcome::Cancelled
            } else {
                JobOutcome::Completed
            };
            finish(&ctx, summary, started)
        }
        .instrument(span)
        .await
    }

    fn targeted_collaborators(
        &self,
        config: &EngineConfig,
    ) -> Result<(Arc<dyn CoordinateResolver>, Arc<dyn ArchiveStorage>), ConfigError> {
        config.validate()?;
        let resolver = self.resolver.clone().ok_or_else(|| ConfigError::Invalid {
            field: "resolver",
            reason: "targeted jobs need a coordinate resolver".to_string(),
        })?;
        let storage = self.storage.clone().ok_or_else(|| ConfigError::Invalid {
            field: "storage",
            reason: "targeted jobs need archive storage".to_string(),
        })?;
        Ok((resolver, storage))
    }

    fn crawl_collaborators(&self, config: &EngineConfig) -> Result<Arc<dyn PageFetcher>, ConfigError> {
        config.validate()?;
        self.page_fetcher.clone().ok_or_else(|| ConfigError::Invalid {
            field: "page_fetcher",
            reason: "crawl jobs need a page fetcher".to_string(),
        })
    }
}

/// Summary of a job that never started.
fn rejected(job: &JobDescriptor, mode: JobMode, reason: String, started: Instant) -> JobSummary {
    let job_id = Uuid::now_v7();
    error!(job_id = %job_id, output_tag = %job.output_tag, reason = %reason, "job rejected");
    let mut summary = JobSummary::new(job_id, job.output_tag.clone(), mode);
    summary.abort(reason);
    if mode == JobMode::Crawl {
        summary.domains = Some(DomainTally::default());
    }
    summary.duration = started.elapsed();
    summary
}

fn finish(ctx: &JobContext, mut summary: JobSummary, started: Instant) -> JobSummary {
    let elapsed = started.elapsed();
    summary.duration = elapsed;
    summary.bytes_fetched = ctx.metrics.bytes_fetched();
    summary.matches_emitted = ctx.metrics.matches_emitted();
    ctx.metrics.report(elapsed);

    match &summary.outcome {
        JobOutcome::Aborted { reason } => error!(reason = %reason, "job aborted"),
        outcome => info!(
            outcome = ?outcome,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped_completed,
            unfinished = summary.unfinished,
            matches = summary.matches_emitted,
            "job finished"
        ),
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemorySink;
    use crate::testing::{MockExtractor, MockSource};

    #[tokio::test]
    async fn test_invalid_config_aborts_before_work() {
        let sink = Arc::new(MemorySink::new());
        let engine = ProbeEngine::new(
            EngineConfig::default(),
            Arc::new(MockExtractor::phones()),
            sink.clone(),
        );
        let job = JobDescriptor::targeted(["example.com"]).with_concurrency_limit(0);

        let summary = engine.run(&job, CancellationToken::new()).await;
        assert!(matches!(summary.outcome, JobOutcome::Aborted { .. }));
        assert_eq!(summary.succeeded + summary.failed, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_crawl_without_fetcher_is_rejected() {
        let engine = ProbeEngine::new(
            EngineConfig::default(),
            Arc::new(MockExtractor::phones()),
            Arc::new(MemorySink::new()),
        );
        let summary = engine
            .run(&JobDescriptor::crawl(["example.com"]), CancellationToken::new())
            .await;
        match summary.outcome {
            JobOutcome::Aborted { reason } => assert!(reason.contains("page_fetcher")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discover_records_failed_sources() {
        use crate::testing::{MockResolver, MockStorage};

        let engine = ProbeEngine::new(
            EngineConfig::default(),
            Arc::new(MockExtractor::phones()),
            Arc::new(MemorySink::new()),
        )
        .with_resolver(Arc::new(MockResolver::new()))
        .with_storage(Arc::new(MockStorage::new()))
        .with_source(Arc::new(MockSource::new("curated").with_urls(["example.com/a"])))
        .with_source(Arc::new(MockSource::failing("archive-index")));

        let summary = engine
            .discover(
                &CandidateQuery::new("555-0100"),
                &JobDescriptor::targeted(Vec::<String>::new()),
                CancellationToken::new(),
            )
            .await;

        assert!(summary.is_completed());
        assert_eq!(summary.missing_coordinates, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.failure_reasons.len(), 2);
        assert!(summary.failure_reasons.iter().all(|f| f.reason.is_skip()));
    }
}
