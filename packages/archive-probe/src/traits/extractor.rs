//! Pluggable pattern extraction.

use crate::types::matches::RawMatch;

/// Finds pattern matches in decoded payload text.
///
/// The engine calls this on bounded windows of a payload, so an extractor
/// must be deterministic: the same text always yields the same matches.
/// Returned offsets are byte offsets into `text`; results need not be
/// sorted.
pub trait Extractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<RawMatch>;
}

impl<F> Extractor for F
where
    F: Fn(&str) -> Vec<RawMatch> + Send + Sync,
{
    fn extract(&self, text: &str) -> Vec<RawMatch> {
        self(text)
    }
}
