//! Integration tests for crawl jobs through the engine.

use archive_probe::{
    checkpoints::MemoryCheckpoint,
    fetchers::RateLimitedFetcher,
    sinks::MemorySink,
    testing::{MockExtractor, MockPageFetcher},
    EngineConfig, JobDescriptor, JobOutcome, ProbeEngine, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn engine(fetcher: MockPageFetcher, config: EngineConfig, sink: Arc<MemorySink>) -> ProbeEngine {
    ProbeEngine::new(config, Arc::new(MockExtractor::phones()), sink).with_page_fetcher(Arc::new(fetcher))
}

/// A seed whose root links to ten children, each linking one level deeper.
fn two_level_site() -> MockPageFetcher {
    let root: String = (0..10)
        .map(|i| format!(r#"<a href="/c{}">child</a>"#, i))
        .collect();
    let mut fetcher = MockPageFetcher::new().with_page("https://example.com", &root);
    for i in 0..10 {
        fetcher = fetcher.with_page(
            &format!("https://example.com/c{}", i),
            &format!(r#"call 555-01{:02} <a href="/c{}/deep">deeper</a>"#, i, i),
        );
    }
    fetcher
}

#[tokio::test]
async fn test_depth_bound_stops_at_max_depth() {
    let fetcher = two_level_site();
    let sink = Arc::new(MemorySink::new());
    let job = JobDescriptor::crawl(["https://example.com"]).with_max_depth(1);

    let summary = engine(fetcher.clone(), EngineConfig::default(), sink.clone())
        .run(&job, CancellationToken::new())
        .await;

    assert!(summary.is_completed());
    assert_eq!(fetcher.fetch_count(), 11);
    assert!(fetcher.requested().iter().all(|url| !url.contains("/deep")));
    assert_eq!(summary.succeeded, 11);
    assert_eq!(summary.domains.as_ref().map(|d| d.completed), Some(1));

    let crawled = sink.crawl_results();
    assert_eq!(crawled.len(), 11);
    assert!(crawled.iter().all(|c| c.depth <= 1));
    assert_eq!(summary.matches_emitted, 10);
}

#[tokio::test]
async fn test_max_depth_two_reaches_deep_pages() {
    let fetcher = two_level_site();
    let job = JobDescriptor::crawl(["https://example.com"])
        .with_max_depth(2)
        .with_max_pages(100);

    let summary = engine(fetcher.clone(), EngineConfig::default(), Arc::new(MemorySink::new()))
        .run(&job, CancellationToken::new())
        .await;

    assert_eq!(fetcher.fetch_count(), 21);
    // Deep pages are not in the site map and answer 404
    assert_eq!(summary.failed, 10);
    assert_eq!(summary.domains.as_ref().map(|d| d.completed), Some(1));
}

#[tokio::test]
async fn test_many_domains_across_workers() {
    let mut fetcher = MockPageFetcher::new();
    let mut seeds = Vec::new();
    for i in 0..12 {
        let seed = format!("https://site{}.example", i);
        fetcher = fetcher.with_page(&seed, &format!("office 555-02{:02}", i));
        seeds.push(seed);
    }
    let sink = Arc::new(MemorySink::new());
    let config = EngineConfig::default().with_crawl_pool(3, 2);

    let summary = engine(fetcher.clone(), config, sink.clone())
        .run(&JobDescriptor::crawl(seeds), CancellationToken::new())
        .await;

    assert_eq!(summary.domains.as_ref().map(|d| d.completed), Some(12));
    assert_eq!(fetcher.fetch_count(), 12);
    assert_eq!(sink.crawl_results().len(), 12);
}

#[tokio::test]
async fn test_worker_crawls_several_domains_at_once() {
    let mut fetcher = MockPageFetcher::new().with_latency(Duration::from_millis(30));
    let mut seeds = Vec::new();
    for i in 0..9 {
        let seed = format!("https://shop{}.example", i);
        fetcher = fetcher.with_page(&seed, "no links here");
        seeds.push(seed);
    }
    let config = EngineConfig::default().with_crawl_pool(1, 3);

    let summary = engine(fetcher.clone(), config, Arc::new(MemorySink::new()))
        .run(&JobDescriptor::crawl(seeds), CancellationToken::new())
        .await;

    assert_eq!(summary.domains.as_ref().map(|d| d.completed), Some(9));
    assert!(fetcher.peak_in_flight() > 1);
    assert!(fetcher.peak_in_flight() <= 3);
}

#[tokio::test]
async fn test_pool_bounds_total_in_flight() {
    let mut fetcher = MockPageFetcher::new().with_latency(Duration::from_millis(20));
    let mut seeds = Vec::new();
    for i in 0..24 {
        let seed = format!("https://store{}.example", i);
        fetcher = fetcher.with_page(&seed, "closed on sundays");
        seeds.push(seed);
    }
    let config = EngineConfig::default().with_crawl_pool(2, 2);

    let summary = engine(fetcher.clone(), config, Arc::new(MemorySink::new()))
        .run(&JobDescriptor::crawl(seeds), CancellationToken::new())
        .await;

    assert_eq!(summary.domains.as_ref().map(|d| d.completed), Some(24));
    assert!(fetcher.peak_in_flight() <= 4);
}

#[tokio::test]
async fn test_resubmitted_crawl_skips_finished_domains() {
    let fetcher = MockPageFetcher::new()
        .with_page("https://a.example", "a")
        .with_page("https://b.example", "b");
    let checkpoint = MemoryCheckpoint::new();
    let job = JobDescriptor::crawl(["https://a.example", "https://b.example"]);

    let first = engine(fetcher.clone(), EngineConfig::default(), Arc::new(MemorySink::new()))
        .with_checkpoint(Arc::new(checkpoint.clone()));
    first.run(&job, CancellationToken::new()).await;
    assert_eq!(fetcher.fetch_count(), 2);

    let second = engine(fetcher.clone(), EngineConfig::default(), Arc::new(MemorySink::new()))
        .with_checkpoint(Arc::new(checkpoint));
    let summary = second.run(&job, CancellationToken::new()).await;

    assert_eq!(summary.skipped_completed, 2);
    assert_eq!(fetcher.fetch_count(), 2);
}

#[tokio::test]
async fn test_cancelled_crawl_reports_cancelled() {
    let root: String = (0..20)
        .map(|i| format!(r#"<a href="/p{}">p</a>"#, i))
        .collect();
    let mock = MockPageFetcher::new().with_page("https://example.com", &root);
    // One request per second per host keeps the crawl busy long enough to cancel
    let fetcher = RateLimitedFetcher::with_burst(mock.clone(), 1, 1).unwrap();

    let engine = ProbeEngine::new(
        EngineConfig::default().with_retry(RetryPolicy::none()),
        Arc::new(MockExtractor::phones()),
        Arc::new(MemorySink::new()),
    )
    .with_page_fetcher(Arc::new(fetcher));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let summary = engine
        .run(&JobDescriptor::crawl(["https://example.com"]), cancel)
        .await;

    assert_eq!(summary.outcome, JobOutcome::Cancelled);
    assert_eq!(summary.unfinished, 1);
    assert!(mock.fetch_count() < 21);
}

#[tokio::test]
async fn test_cancel_lets_page_in_flight_finish() {
    let fetcher = MockPageFetcher::new()
        .with_page("https://example.com", r#"555-0100 <a href="/next">next</a>"#)
        .with_page("https://example.com/next", "555-0101")
        .with_latency(Duration::from_millis(200));
    let sink = Arc::new(MemorySink::new());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let summary = engine(fetcher.clone(), EngineConfig::default(), sink.clone())
        .run(&JobDescriptor::crawl(["https://example.com"]), cancel)
        .await;

    assert_eq!(summary.outcome, JobOutcome::Cancelled);
    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(summary.succeeded, 1);
    let crawled = sink.crawl_results();
    assert_eq!(crawled.len(), 1);
    assert_eq!(crawled[0].extracted.len(), 1);
}
