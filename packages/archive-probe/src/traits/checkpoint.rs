//! Progress checkpoints that survive cancellation and restarts.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::CheckpointResult;

/// Records completed work keys (coordinates and seed domains).
///
/// Keys are opaque strings produced by
/// [`ArchiveCoordinate::checkpoint_key`](crate::ArchiveCoordinate::checkpoint_key)
/// and [`CrawlTask::checkpoint_key`](crate::CrawlTask::checkpoint_key).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Every key completed so far.
    async fn load(&self) -> CheckpointResult<HashSet<String>>;

    /// Persist one completed key.
    async fn mark_complete(&self, key: &str) -> CheckpointResult<()>;
}
