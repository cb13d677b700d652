//! Extraction pattern implementations.
//!
//! - `RegexExtractor` - Named regular expressions with surrounding context

pub mod regex;

pub use self::regex::RegexExtractor;
