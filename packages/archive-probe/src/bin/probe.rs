//! Command-line runner for archive probe jobs.

use anyhow::{bail, Context, Result};
use archive_probe::checkpoints::{FileCheckpoint, MemoryCheckpoint};
use archive_probe::extractors::RegexExtractor;
use archive_probe::fetchers::{HttpPageFetcher, RateLimitedFetcher};
use archive_probe::resolvers::IndexFileResolver;
use archive_probe::sinks::JsonLinesSink;
use archive_probe::storage::{FileStorage, HttpRangeStorage};
use archive_probe::{
    CheckpointStore, EngineConfig, JobDescriptor, JobMode, ProbeEngine, ResultSink,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "probe", version, about = "Targeted web-archive discovery")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a job described by a JSON file
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Job descriptor (JSON)
    #[arg(long)]
    job: PathBuf,

    /// Capture index (JSON lines) for targeted jobs
    #[arg(long, env = "PROBE_INDEX")]
    index: Option<PathBuf>,

    /// Base URL archive files are served from
    #[arg(long, env = "PROBE_STORAGE_URL", conflicts_with = "storage_dir")]
    storage_url: Option<String>,

    /// Directory holding archive files
    #[arg(long, env = "PROBE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Extraction pattern as name=regex; repeatable. Defaults to emails and phones.
    #[arg(long = "pattern", value_name = "NAME=REGEX")]
    patterns: Vec<String>,

    /// Completion log; resubmitting with the same file skips finished work
    #[arg(long, env = "PROBE_CHECKPOINT")]
    checkpoint: Option<PathBuf>,

    /// Results file (JSON lines); stdout when omitted
    #[arg(long)]
    out: Option<PathBuf>,

    /// Crawl requests per second per host
    #[arg(long, default_value_t = 2)]
    rps: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,archive_probe=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = EngineConfig::from_env().context("Failed to load engine configuration")?;

    let job_text = tokio::fs::read_to_string(&args.job)
        .await
        .with_context(|| format!("Failed to read job file {}", args.job.display()))?;
    let job: JobDescriptor = serde_json::from_str(&job_text).context("Invalid job descriptor")?;

    let sink: Arc<dyn ResultSink> = match &args.out {
        Some(path) => Arc::new(
            JsonLinesSink::append(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Arc::new(JsonLinesSink::stdout()),
    };

    let checkpoint: Arc<dyn CheckpointStore> = match &args.checkpoint {
        Some(path) => Arc::new(FileCheckpoint::new(path)),
        None => Arc::new(MemoryCheckpoint::new()),
    };

    let mut engine = ProbeEngine::new(config.clone(), Arc::new(build_extractor(&args.patterns)?), sink)
        .with_checkpoint(checkpoint);

    match job.mode {
        JobMode::Targeted => {
            let index = args
                .index
                .as_ref()
                .context("Targeted jobs need --index")?;
            let resolver = IndexFileResolver::load(index)
                .with_context(|| format!("Failed to load index {}", index.display()))?;
            tracing::info!(urls = resolver.len(), "capture index loaded");
            engine = engine.with_resolver(Arc::new(resolver));

            engine = match (&args.storage_url, &args.storage_dir) {
                (Some(url), _) => engine.with_storage(Arc::new(
                    HttpRangeStorage::new(url, config.per_fetch_timeout)
                        .context("Invalid storage URL")?,
                )),
                (None, Some(dir)) => engine.with_storage(Arc::new(FileStorage::new(dir))),
                (None, None) => bail!("Targeted jobs need --storage-url or --storage-dir"),
            };
        }
        JobMode::Crawl => {
            let http = HttpPageFetcher::new(config.per_fetch_timeout).context("Failed to build HTTP client")?;
            let fetcher = RateLimitedFetcher::new(http, args.rps).context("Invalid --rps")?;
            engine = engine.with_page_fetcher(Arc::new(fetcher));
        }
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping job");
            on_signal.cancel();
        }
    });

    let summary = engine.run(&job, cancel).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
    );

    if !summary.is_completed() {
        std::process::exit(2);
    }
    Ok(())
}

fn build_extractor(patterns: &[String]) -> Result<RegexExtractor> {
    if patterns.is_empty() {
        return Ok(RegexExtractor::contacts());
    }
    let mut extractor = RegexExtractor::new();
    for entry in patterns {
        let (name, regex) = entry
            .split_once('=')
            .with_context(|| format!("Pattern {:?} is not NAME=REGEX", entry))?;
        extractor = extractor
            .with_pattern(name.trim(), regex)
            .with_context(|| format!("Invalid regex for pattern {}", name))?;
    }
    Ok(extractor)
}
