use lazy_static::lazy_static;
use regex::Regex;

use crate::traits::extractor::Extractor;
use crate::types::matches::RawMatch;

lazy_static! {
    // Email - RFC 5322 simplified
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b"
    ).unwrap();

    // North American phone numbers with optional country code
    static ref PHONE_REGEX: Regex = Regex::new(
        r"(?:\+?1[-.\s]?)?\(?\b[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s][0-9]{4}\b"
    ).unwrap();
}

const DEFAULT_CONTEXT_CHARS: usize = 40;

/// Extractor over a list of named patterns.
///
/// Matches are reported in offset order; when two patterns match at the
/// same offset the one registered first comes first. Offsets are byte
/// offsets into the text handed to [`Extractor::extract`].
#[derive(Debug, Clone)]
pub struct RegexExtractor {
    patterns: Vec<(String, Regex)>,
    context_chars: usize,
}

impl Default for RegexExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl RegexExtractor {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            context_chars: DEFAULT_CONTEXT_CHARS,
        }
    }

    /// Email addresses and phone numbers.
    pub fn contacts() -> Self {
        Self::new()
            .with_regex("email", EMAIL_REGEX.clone())
            .with_regex("phone", PHONE_REGEX.clone())
    }

    /// Add a named pattern.
    pub fn with_pattern(self, name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(self.with_regex(name, Regex::new(pattern)?))
    }

    /// Add a compiled pattern.
    pub fn with_regex(mut self, name: impl Into<String>, regex: Regex) -> Self {
        self.patterns.push((name.into(), regex));
        self
    }

    /// Characters of context captured on each side of a match.
    pub fn with_context_chars(mut self, chars: usize) -> Self {
        self.context_chars = chars;
        self
    }

    pub fn pattern_names(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(name, _)| name.as_str())
    }

    fn context(&self, text: &str, start: usize, end: usize) -> (String, String) {
        let before_start = text[..start]
            .char_indices()
            .rev()
            .nth(self.context_chars.saturating_sub(1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let before = if self.context_chars == 0 {
            ""
        } else {
            &text[before_start..start]
        };
        let after: String = text[end..].chars().take(self.context_chars).collect();
        (before.to_string(), after)
    }
}

impl Extractor for RegexExtractor {
    fn extract(&self, text: &str) -> Vec<RawMatch> {
        let mut found: Vec<(usize, usize, RawMatch)> = Vec::new();
        for (rank, (name, regex)) in self.patterns.iter().enumerate() {
            for m in regex.find_iter(text) {
                if m.as_str().is_empty() {
                    continue;
                }
                let (before, after) = self.context(text, m.start(), m.end());
                let raw = RawMatch::new(name.clone(), m.as_str(), m.start()).with_context(before, after);
                found.push((m.start(), rank, raw));
            }
        }
        found.sort_by_key(|(start, rank, _)| (*start, *rank));
        found.into_iter().map(|(_, _, raw)| raw).collect()
    }
}
