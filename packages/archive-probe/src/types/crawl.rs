//! Crawl task state and per-page results.

use serde::{Deserialize, Serialize};

use super::matches::ExtractionMatch;

/// Lifecycle of one seed domain.
///
/// ```text
/// Queued -> Fetching -> PageComplete -> Fetching (next page)
///                                    \-> DomainComplete
/// Fetching (root, retries exhausted) -> DomainFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainState {
    Queued,
    Fetching,
    PageComplete,
    DomainComplete,
    DomainFailed,
}

impl DomainState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::DomainComplete | Self::DomainFailed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: DomainState) -> bool {
        use DomainState::*;
        matches!(
            (self, next),
            (Queued, Fetching)
                | (Fetching, PageComplete)
                | (Fetching, Fetching)
                | (Fetching, DomainFailed)
                | (Fetching, DomainComplete)
                | (PageComplete, Fetching)
                | (PageComplete, DomainComplete)
        )
    }
}

/// One seed domain to crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTask {
    /// Normalized seed URL (root of the domain crawl)
    pub seed_domain: String,

    /// Maximum link depth from the seed (0 = seed only)
    pub max_depth: u32,

    /// Maximum pages attempted for this domain
    pub max_pages: usize,

    pub state: DomainState,
}

impl CrawlTask {
    pub fn new(seed_domain: impl Into<String>, max_depth: u32, max_pages: usize) -> Self {
        Self {
            seed_domain: seed_domain.into(),
            max_depth,
            max_pages,
            state: DomainState::Queued,
        }
    }

    /// Move to `next`, logging illegal transitions instead of panicking.
    pub fn transition(&mut self, next: DomainState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                seed = %self.seed_domain,
                from = ?self.state,
                to = ?next,
                "unexpected crawl state transition"
            );
        }
        self.state = next;
    }

    /// Checkpoint key for a completed domain.
    pub fn checkpoint_key(&self) -> String {
        format!("domain:{}", self.seed_domain)
    }
}

/// A successfully fetched crawl page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,
    pub depth: u32,
    pub status_code: u16,
    pub content: String,
    #[serde(default)]
    pub extracted: Vec<ExtractionMatch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use DomainState::*;
        assert!(Queued.can_transition_to(Fetching));
        assert!(Fetching.can_transition_to(PageComplete));
        assert!(PageComplete.can_transition_to(Fetching));
        assert!(PageComplete.can_transition_to(DomainComplete));
        assert!(Fetching.can_transition_to(DomainFailed));
        assert!(!Queued.can_transition_to(DomainComplete));
        assert!(!DomainComplete.can_transition_to(Fetching));
        assert!(!PageComplete.can_transition_to(DomainFailed));
    }

    #[test]
    fn test_task_starts_queued() {
        let mut task = CrawlTask::new("https://example.com", 2, 10);
        assert_eq!(task.state, DomainState::Queued);
        task.transition(DomainState::Fetching);
        task.transition(DomainState::PageComplete);
        task.transition(DomainState::DomainComplete);
        assert!(task.state.is_terminal());
        assert_eq!(task.checkpoint_key(), "domain:https://example.com");
    }
}
