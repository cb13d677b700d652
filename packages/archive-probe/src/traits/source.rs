//! Intelligence sources that surface candidate URLs.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::locator::{CandidateLocator, CandidateQuery};

/// A source of candidate URLs for an identifier.
///
/// Implementations (archive-index search, internal-index search, curated
/// lists) live outside this crate. Each source stamps its locators with
/// its own [`tag`](CandidateSource::tag).
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Tag used for priority ranking and carried through to the sink.
    fn tag(&self) -> &str;

    /// Query the source.
    async fn query(&self, query: &CandidateQuery) -> Result<Vec<CandidateLocator>, SourceError>;
}
