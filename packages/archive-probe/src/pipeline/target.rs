//! Target resolution - merge candidate URLs from every source into one
//! deduplicated set.
//!
//! URLs are normalized before comparison, so `https://Example.com/a/`,
//! `https://example.com/a#top` and `https://example.com/a?utm_source=x`
//! collapse into one candidate. The first occurrence in source-priority
//! order wins; confidence scores are carried but never merged.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::traits::source::CandidateSource;
use crate::types::locator::{CandidateQuery, ResolvedCandidate, SourceBatch};
use crate::types::summary::{FailureReason, FailureRecord};

/// Predicate returning `true` for normalized URLs that must be dropped.
pub type ExclusionFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Query parameters that only carry campaign tracking.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "dclid", "msclkid", "mc_cid", "mc_eid", "_ga", "igshid", "yclid",
];

/// Schemes that can appear without `//` and never name a fetchable page.
const NON_WEB_SCHEMES: &[&str] = &["mailto:", "javascript:", "tel:", "data:", "about:", "file:"];

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Normalize a URL for deduplication.
///
/// Adds `http://` when the scheme is missing, lower-cases the host, drops
/// the default port, the fragment, tracking parameters and any trailing
/// slash. Remaining query parameters keep their order. Returns `None` for
/// anything that is not an http(s) URL with a host.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_ascii_lowercase();
    if NON_WEB_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme)) {
        return None;
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let url = Url::parse(&with_scheme).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }

    // Raw segments keep their encoding so the result matches index keys
    let kept: Vec<&str> = url
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| {
            let name = segment.split_once('=').map_or(*segment, |(name, _)| name);
            !is_tracking_param(name)
        })
        .collect();

    let mut normalized = format!("{}://{}", url.scheme(), host);
    // `port()` is None when the port is the scheme default
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{}", port));
    }
    normalized.push_str(url.path().trim_end_matches('/'));

    if !kept.is_empty() {
        normalized.push('?');
        normalized.push_str(&kept.join("&"));
    }

    Some(normalized)
}

/// Merged candidate set plus what was dropped on the way.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTargets {
    pub candidates: Vec<ResolvedCandidate>,
    pub duplicates: usize,
    pub excluded: usize,
    pub invalid: usize,
}

/// Everything returned by the candidate sources for one query.
#[derive(Debug, Default)]
pub struct GatheredCandidates {
    pub batches: Vec<SourceBatch>,

    /// Sources that failed to answer (recorded as skips)
    pub source_failures: Vec<FailureRecord>,
}

/// Merges locators from several sources.
#[derive(Debug, Clone, Default)]
pub struct TargetResolver {
    source_priority: Vec<String>,
}

impl TargetResolver {
    /// Create a resolver ranking sources by `source_priority` (highest
    /// first). Sources not listed keep their input order after listed ones.
    pub fn new(source_priority: Vec<String>) -> Self {
        Self { source_priority }
    }

    fn rank(&self, source_tag: &str) -> usize {
        self.source_priority
            .iter()
            .position(|tag| tag == source_tag)
            .unwrap_or(self.source_priority.len())
    }

    /// Query every source concurrently. A failing source is logged and
    /// reported; the others still contribute.
    pub async fn gather(
        &self,
        sources: &[Arc<dyn CandidateSource>],
        query: &CandidateQuery,
    ) -> GatheredCandidates {
        let responses = join_all(sources.iter().map(|source| async move {
            (source.tag().to_string(), source.query(query).await)
        }))
        .await;

        let mut gathered = GatheredCandidates::default();
        for (tag, response) in responses {
            match response {
                Ok(locators) => {
                    debug!(source = %tag, count = locators.len(), "source answered");
                    gathered
                        .batches
                        .push(SourceBatch::from_locators(tag, locators));
                }
                Err(e) => {
                    warn!(source = %tag, error = %e, "candidate source failed");
                    gathered.source_failures.push(FailureRecord::new(
                        tag,
                        FailureReason::SourceFailed,
                        e.to_string(),
                    ));
                }
            }
        }
        gathered
    }

    /// Merge batches into a deduplicated candidate list.
    pub fn resolve(
        &self,
        mut batches: Vec<SourceBatch>,
        exclusion: Option<&ExclusionFilter>,
    ) -> ResolvedTargets {
        // Stable: equal ranks keep their input order
        batches.sort_by_key(|batch| self.rank(&batch.source_tag));

        let mut seen = HashSet::new();
        let mut targets = ResolvedTargets::default();

        for batch in batches {
            for locator in batch.locators {
                let Some(normalized_url) = normalize_url(&locator.url) else {
                    debug!(url = %locator.url, source = %locator.source_tag, "unparseable candidate");
                    targets.invalid += 1;
                    continue;
                };
                if exclusion.is_some_and(|exclude| (**exclude)(&normalized_url)) {
                    targets.excluded += 1;
                    continue;
                }
                if !seen.insert(normalized_url.clone()) {
                    targets.duplicates += 1;
                    continue;
                }
                targets.candidates.push(ResolvedCandidate {
                    normalized_url,
                    locator,
                });
            }
        }

        debug!(
            candidates = targets.candidates.len(),
            duplicates = targets.duplicates,
            excluded = targets.excluded,
            invalid = targets.invalid,
            "targets resolved"
        );
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::locator::CandidateLocator;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("Example.COM/About/").as_deref(),
            Some("http://example.com/About")
        );
        assert_eq!(
            normalize_url("https://example.com:443/").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_url("http://example.com:8080/a#frag").as_deref(),
            Some("http://example.com:8080/a")
        );
        assert_eq!(
            normalize_url("https://example.com/p?utm_source=x&id=7&gclid=abc&q=1").as_deref(),
            Some("https://example.com/p?id=7&q=1")
        );
        assert_eq!(normalize_url(""), None);
        assert_eq!(normalize_url("mailto:someone@example.com"), None);
        assert_eq!(normalize_url("ftp://example.com/file"), None);
        assert_eq!(normalize_url("http://"), None);
    }

    #[test]
    fn test_normalize_keeps_query_encoding() {
        assert_eq!(
            normalize_url("https://example.com/search?q=a%20b&flag&utm_medium=mail").as_deref(),
            Some("https://example.com/search?q=a%20b&flag")
        );
        assert_eq!(
            normalize_url("https://example.com/p?&id=7&&").as_deref(),
            Some("https://example.com/p?id=7")
        );
        assert_eq!(
            normalize_url("https://example.com/p?utm_source=x").as_deref(),
            Some("https://example.com/p")
        );
    }

    #[test]
    fn test_duplicates_across_sources_collapse() {
        let resolver = TargetResolver::default();
        let batches = vec![
            SourceBatch::new(
                "archive-index",
                ["https://Example.com/contact/", "https://example.com/contact#phone"],
            ),
            SourceBatch::new("curated", ["https://example.com/contact?utm_medium=email"]),
        ];

        let targets = resolver.resolve(batches, None);
        assert_eq!(targets.candidates.len(), 1);
        assert_eq!(targets.duplicates, 2);
        assert_eq!(
            targets.candidates[0].normalized_url,
            "https://example.com/contact"
        );
        assert_eq!(targets.candidates[0].locator.source_tag, "archive-index");
    }

    #[test]
    fn test_priority_decides_which_source_wins() {
        let resolver = TargetResolver::new(vec!["curated".into()]);
        let batches = vec![
            SourceBatch::from_locators(
                "archive-index",
                vec![CandidateLocator::new("example.com/a", "archive-index").with_confidence(0.2)],
            ),
            SourceBatch::from_locators(
                "curated",
                vec![CandidateLocator::new("example.com/a", "curated").with_confidence(0.9)],
            ),
        ];

        let targets = resolver.resolve(batches, None);
        assert_eq!(targets.candidates.len(), 1);
        assert_eq!(targets.candidates[0].locator.source_tag, "curated");
        assert_eq!(targets.candidates[0].locator.confidence, 0.9);
    }

    #[test]
    fn test_exclusion_and_invalid_are_counted() {
        let resolver = TargetResolver::default();
        let exclude: ExclusionFilter = Arc::new(|url: &str| url.contains("/careers"));
        let batches = vec![SourceBatch::new(
            "curated",
            ["example.com/careers", "example.com/team", "javascript:void(0)", "  "],
        )];

        let targets = resolver.resolve(batches, Some(&exclude));
        assert_eq!(targets.candidates.len(), 1);
        assert_eq!(targets.excluded, 1);
        assert_eq!(targets.invalid, 2);
    }

    #[tokio::test]
    async fn test_gather_tolerates_failing_source() {
        use crate::testing::MockSource;

        let sources: Vec<Arc<dyn CandidateSource>> = vec![
            Arc::new(MockSource::new("curated").with_urls(["example.com/a", "example.com/b"])),
            Arc::new(MockSource::failing("archive-index")),
        ];

        let gathered = TargetResolver::default()
            .gather(&sources, &CandidateQuery::new("555-0100"))
            .await;

        assert_eq!(gathered.batches.len(), 1);
        assert_eq!(gathered.batches[0].locators.len(), 2);
        assert_eq!(gathered.source_failures.len(), 1);
        assert_eq!(gathered.source_failures[0].target, "archive-index");
        assert!(gathered.source_failures[0].reason.is_skip());
    }

    fn url_strategy() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["http://", "https://", ""]),
            prop::sample::select(vec!["example.com", "EXAMPLE.com", "other.org", "www.example.com"]),
            prop::sample::select(vec!["", "/", "/a", "/a/", "/b?x=1", "/a?utm_source=z", "/a#f"]),
        )
            .prop_map(|(scheme, host, path)| format!("{}{}{}", scheme, host, path))
    }

    proptest! {
        #[test]
        fn prop_each_normalized_url_appears_once(
            first in prop::collection::vec(url_strategy(), 0..20),
            second in prop::collection::vec(url_strategy(), 0..20),
        ) {
            let total = first.len() + second.len();
            let targets = TargetResolver::default().resolve(
                vec![SourceBatch::new("one", first), SourceBatch::new("two", second)],
                None,
            );

            let unique: HashSet<_> = targets.candidates.iter().map(|c| &c.normalized_url).collect();
            prop_assert_eq!(unique.len(), targets.candidates.len());
            prop_assert_eq!(
                targets.candidates.len() + targets.duplicates + targets.excluded + targets.invalid,
                total
            );
        }

        #[test]
        fn prop_normalization_is_idempotent(url in url_strategy()) {
            if let Some(once) = normalize_url(&url) {
                prop_assert_eq!(normalize_url(&once), Some(once.clone()));
            }
        }
    }
}
