//! Coordinate resolution - mapping a URL to archive records.

use async_trait::async_trait;

use crate::error::ResolveError;
use crate::types::coordinate::ArchiveCoordinate;

/// Maps a normalized URL to zero or more archive coordinates.
///
/// Returning `Ok(vec![])` and `Err(ResolveError::NotFound)` mean the same
/// thing to the planner: the candidate is skipped as a missing coordinate.
#[async_trait]
pub trait CoordinateResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<Vec<ArchiveCoordinate>, ResolveError>;
}
