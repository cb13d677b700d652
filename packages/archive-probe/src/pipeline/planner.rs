//! Fetch planning - resolve candidates to archive coordinates and pack them
//! into byte-bounded batches.

use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ResolveError;
use crate::traits::resolver::CoordinateResolver;
use crate::types::config::EngineConfig;
use crate::types::locator::ResolvedCandidate;
use crate::types::manifest::{CostEstimate, FetchBatch, FetchManifest, PlannedFetch};
use crate::types::summary::{FailureReason, FailureRecord};

/// Result of planning: the manifest plus every candidate that could not
/// enter it.
#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    pub manifest: FetchManifest,

    /// Missing and invalid coordinates (all skips)
    pub failures: Vec<FailureRecord>,

    pub missing_coordinates: usize,
    pub invalid_coordinates: usize,

    /// Coordinates reached from more than one candidate
    pub duplicate_coordinates: usize,
}

/// Builds fetch manifests.
pub struct FetchPlanner {
    resolver: Arc<dyn CoordinateResolver>,
    resolve_concurrency: usize,
    batch_max_bytes: u64,
    assumed_throughput: u64,
}

impl FetchPlanner {
    pub fn new(resolver: Arc<dyn CoordinateResolver>, config: &EngineConfig) -> Self {
        Self {
            resolver,
            resolve_concurrency: config.resolve_concurrency.max(1),
            batch_max_bytes: config.batch_max_bytes,
            assumed_throughput: config.assumed_throughput_bytes_per_sec,
        }
    }

    /// Resolve every candidate and pack the valid coordinates.
    pub async fn plan(&self, candidates: &[ResolvedCandidate]) -> PlanOutcome {
        let resolver = &self.resolver;
        // `buffered` keeps candidate order, so first-seen wins deterministically
        let resolved: Vec<_> = stream::iter(candidates)
            .map(|candidate| async move {
                let result = resolver.resolve(&candidate.normalized_url).await;
                (candidate, result)
            })
            .buffered(self.resolve_concurrency)
            .collect()
            .await;

        let mut outcome = PlanOutcome::default();
        let mut seen = HashSet::new();
        let mut fetches = Vec::new();

        for (candidate, result) in resolved {
            let url = &candidate.normalized_url;
            let coordinates = match result {
                Ok(coordinates) if !coordinates.is_empty() => coordinates,
                Ok(_) | Err(ResolveError::NotFound { .. }) => {
                    debug!(url = %url, "no archive coordinate");
                    outcome.missing_coordinates += 1;
                    outcome.failures.push(FailureRecord::new(
                        url.clone(),
                        FailureReason::MissingCoordinate,
                        "no archive record",
                    ));
                    continue;
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "coordinate lookup failed");
                    outcome.missing_coordinates += 1;
                    outcome.failures.push(FailureRecord::new(
                        url.clone(),
                        FailureReason::MissingCoordinate,
                        e.to_string(),
                    ));
                    continue;
                }
            };

            for coordinate in coordinates {
                if !coordinate.is_valid() {
                    outcome.invalid_coordinates += 1;
                    outcome.failures.push(FailureRecord::new(
                        url.clone(),
                        FailureReason::InvalidCoordinate,
                        format!("invalid coordinate {}", coordinate),
                    ));
                    continue;
                }
                if !seen.insert(coordinate.checkpoint_key()) {
                    outcome.duplicate_coordinates += 1;
                    continue;
                }
                fetches.push(PlannedFetch {
                    coordinate,
                    source_url: candidate.locator.url.clone(),
                    source_tag: candidate.locator.source_tag.clone(),
                });
            }
        }

        let batches = pack_batches(fetches, self.batch_max_bytes);
        let estimate = estimate_cost(&batches, self.assumed_throughput);
        info!(
            coordinates = batches.iter().map(FetchBatch::len).sum::<usize>(),
            batches = estimate.batch_count,
            total_bytes = estimate.total_bytes,
            archives = estimate.distinct_archives,
            estimated_secs = estimate.estimated_duration.as_secs_f64(),
            missing = outcome.missing_coordinates,
            invalid = outcome.invalid_coordinates,
            "fetch manifest planned"
        );

        outcome.manifest = FetchManifest { batches, estimate };
        outcome
    }
}

/// Group fetches by archive (first-seen order), sort each group by offset,
/// then pack consecutive fetches into batches of at most `batch_max_bytes`.
///
/// A coordinate larger than the cap gets a batch of its own. Batches may
/// span archive boundaries.
pub fn pack_batches(fetches: Vec<PlannedFetch>, batch_max_bytes: u64) -> Vec<FetchBatch> {
    let mut groups: IndexMap<String, Vec<PlannedFetch>> = IndexMap::new();
    for fetch in fetches {
        groups
            .entry(fetch.coordinate.archive_id.clone())
            .or_default()
            .push(fetch);
    }

    let mut batches = Vec::new();
    let mut current = FetchBatch::default();
    let mut current_bytes = 0u64;

    for (_, mut group) in groups {
        group.sort_by_key(|f| f.coordinate.offset);
        for fetch in group {
            let span = fetch.coordinate.fetch_span();
            if span > batch_max_bytes {
                if !current.is_empty() {
                    batches.push(std::mem::take(&mut current));
                    current_bytes = 0;
                }
                batches.push(FetchBatch {
                    fetches: vec![fetch],
                });
                continue;
            }
            if current_bytes + span > batch_max_bytes {
                batches.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
            current_bytes += span;
            current.fetches.push(fetch);
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Reporting-only cost estimate.
pub fn estimate_cost(batches: &[FetchBatch], assumed_throughput: u64) -> CostEstimate {
    let fetches = || batches.iter().flat_map(|b| b.fetches.iter());
    let total_bytes: u64 = fetches().map(|f| f.coordinate.fetch_span()).sum();
    let inflated_bytes: u64 = fetches().map(|f| f.coordinate.length).sum();
    let distinct_archives = fetches()
        .map(|f| f.coordinate.archive_id.as_str())
        .collect::<HashSet<_>>()
        .len();

    CostEstimate {
        total_bytes,
        inflated_bytes,
        distinct_archives,
        batch_count: batches.len(),
        estimated_duration: Duration::from_secs_f64(
            total_bytes as f64 / assumed_throughput.max(1) as f64,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockResolver;
    use crate::types::coordinate::ArchiveCoordinate;
    use crate::types::locator::CandidateLocator;
    use proptest::prelude::*;

    fn candidate(url: &str) -> ResolvedCandidate {
        ResolvedCandidate {
            normalized_url: url.to_string(),
            locator: CandidateLocator::new(url, "curated"),
        }
    }

    fn planned(archive: &str, offset: u64, len: u64) -> PlannedFetch {
        PlannedFetch {
            coordinate: ArchiveCoordinate::new(archive, offset, len),
            source_url: format!("http://example.com/{}", offset),
            source_tag: "curated".to_string(),
        }
    }

    #[test]
    fn test_pack_groups_and_sorts() {
        let fetches = vec![
            planned("b", 500, 10),
            planned("a", 300, 10),
            planned("b", 100, 10),
            planned("a", 0, 10),
        ];
        let batches = pack_batches(fetches, 1000);
        assert_eq!(batches.len(), 1);

        let order: Vec<_> = batches[0]
            .fetches
            .iter()
            .map(|f| (f.coordinate.archive_id.as_str(), f.coordinate.offset))
            .collect();
        assert_eq!(order, vec![("b", 100), ("b", 500), ("a", 0), ("a", 300)]);
    }

    #[test]
    fn test_oversized_coordinate_gets_own_batch() {
        let fetches = vec![planned("a", 0, 40), planned("a", 100, 500), planned("a", 900, 40)];
        let batches = pack_batches(fetches, 100);
        let sizes: Vec<_> = batches.iter().map(FetchBatch::len).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
        assert_eq!(batches[1].total_bytes(), 500);
    }

    #[test]
    fn test_estimate() {
        let batches = pack_batches(vec![planned("a", 0, 600), planned("b", 0, 400)], 1000);
        let estimate = estimate_cost(&batches, 500);
        assert_eq!(estimate.total_bytes, 1000);
        assert_eq!(estimate.distinct_archives, 2);
        assert_eq!(estimate.batch_count, 1);
        assert_eq!(estimate.estimated_duration, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_plan_skips_missing_and_invalid() {
        let resolver = MockResolver::new()
            .with_coordinates("http://example.com/a", vec![ArchiveCoordinate::new("x.warc.gz", 0, 100)])
            .with_coordinates(
                "http://example.com/b",
                vec![
                    ArchiveCoordinate::new("x.warc.gz", 0, 100),
                    ArchiveCoordinate::new("", 10, 100),
                ],
            )
            .with_error("http://example.com/c", "index offline");

        let planner = FetchPlanner::new(Arc::new(resolver), &EngineConfig::default());
        let outcome = planner
            .plan(&[
                candidate("http://example.com/a"),
                candidate("http://example.com/b"),
                candidate("http://example.com/c"),
                candidate("http://example.com/d"),
            ])
            .await;

        assert_eq!(outcome.manifest.coordinate_count(), 1);
        assert_eq!(outcome.duplicate_coordinates, 1);
        assert_eq!(outcome.invalid_coordinates, 1);
        assert_eq!(outcome.missing_coordinates, 2);
        assert!(outcome.failures.iter().all(|f| f.reason.is_skip()));

        let first = outcome.manifest.fetches().next().unwrap();
        assert_eq!(first.source_url, "http://example.com/a");
    }

    #[tokio::test]
    async fn test_source_url_keeps_winning_locator() {
        let resolver = MockResolver::new().with_coordinates(
            "http://example.com/a",
            vec![ArchiveCoordinate::new("x.warc.gz", 0, 100)],
        );
        let planner = FetchPlanner::new(Arc::new(resolver), &EngineConfig::default());
        let outcome = planner
            .plan(&[ResolvedCandidate {
                normalized_url: "http://example.com/a".to_string(),
                locator: CandidateLocator::new("http://Example.com/a?utm_source=mail", "curated"),
            }])
            .await;

        let planned = outcome.manifest.fetches().next().unwrap();
        assert_eq!(planned.source_url, "http://Example.com/a?utm_source=mail");
        assert_eq!(planned.coordinate.offset, 0);
    }

    proptest! {
        #[test]
        fn prop_batches_respect_cap(
            spans in prop::collection::vec((0u8..4, 0u64..10_000, 1u64..3_000), 0..60),
            cap in 1u64..5_000,
        ) {
            let fetches: Vec<_> = spans
                .iter()
                .map(|(archive, offset, len)| planned(&format!("arc-{}", archive), *offset, *len))
                .collect();
            let count = fetches.len();
            let batches = pack_batches(fetches, cap);

            prop_assert_eq!(batches.iter().map(FetchBatch::len).sum::<usize>(), count);
            for batch in &batches {
                prop_assert!(!batch.is_empty());
                prop_assert!(batch.total_bytes() <= cap || batch.len() == 1);
            }

            // Offsets never go backwards inside one archive
            let mut last: std::collections::HashMap<String, u64> = Default::default();
            for fetch in batches.iter().flat_map(|b| b.fetches.iter()) {
                let prev = last.insert(fetch.coordinate.archive_id.clone(), fetch.coordinate.offset);
                if let Some(prev) = prev {
                    prop_assert!(prev <= fetch.coordinate.offset);
                }
            }
        }
    }
}
