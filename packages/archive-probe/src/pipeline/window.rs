//! Windowed extraction over streamed payload text.
//!
//! Text is buffered until a full window is available, the extractor runs
//! on the window, and matches starting before the commit point
//! (`window - overlap`) are released. The next window starts `overlap`
//! bytes before the commit point so matches near the boundary see their
//! left context. A match of at most `overlap` bytes is always found whole.
//! Matches of different pattern types may overlap and are all released.

use std::collections::HashMap;

use crate::traits::extractor::Extractor;
use crate::types::matches::RawMatch;

/// Streaming driver for an [`Extractor`].
///
/// Released matches carry their byte offset in the whole payload and come
/// out in ascending offset order.
#[derive(Debug)]
pub struct WindowedExtractor {
    window_bytes: usize,
    overlap: usize,
    buffer: String,
    /// Payload offset of `buffer[0]`
    text_start: u64,
    /// Matches starting before this offset were already considered
    emit_from: u64,
    /// End of the last released match, per pattern type
    covered_until: HashMap<String, u64>,
}

impl WindowedExtractor {
    pub fn new(window_bytes: usize, overlap: usize) -> Self {
        Self {
            window_bytes: window_bytes.max(1),
            overlap: overlap.min(window_bytes / 2),
            buffer: String::new(),
            text_start: 0,
            emit_from: 0,
            covered_until: HashMap::new(),
        }
    }

    /// Append text and release the matches of every window it completes.
    pub fn push(&mut self, text: &str, extractor: &dyn Extractor) -> Vec<(u64, RawMatch)> {
        self.buffer.push_str(text);
        let mut released = Vec::new();

        while self.buffer.len() >= self.window_bytes {
            let window_end = floor_boundary(&self.buffer, self.window_bytes);
            let commit_end = floor_boundary(&self.buffer, window_end - self.overlap);
            let found = extractor.extract(&self.buffer[..window_end]);
            self.release(found, commit_end, &mut released);

            let mut keep_from = floor_boundary(&self.buffer, commit_end.saturating_sub(self.overlap));
            if keep_from == 0 {
                keep_from = next_boundary(&self.buffer, 0);
            }
            self.emit_from = self.text_start + commit_end as u64;
            self.buffer.drain(..keep_from);
            self.text_start += keep_from as u64;
        }

        released
    }

    /// Run the extractor over whatever is left and release everything.
    pub fn finish(&mut self, extractor: &dyn Extractor) -> Vec<(u64, RawMatch)> {
        let mut released = Vec::new();
        if !self.buffer.is_empty() {
            let found = extractor.extract(&self.buffer);
            let end = self.buffer.len();
            self.release(found, end, &mut released);
            self.text_start += end as u64;
            self.emit_from = self.text_start;
            self.buffer.clear();
        }
        released
    }

    /// Total payload bytes consumed so far.
    pub fn consumed(&self) -> u64 {
        self.text_start + self.buffer.len() as u64
    }

    fn release(&mut self, mut found: Vec<RawMatch>, commit_end: usize, out: &mut Vec<(u64, RawMatch)>) {
        found.sort_by_key(|m| m.offset);
        for raw in found {
            if raw.offset >= commit_end {
                continue;
            }
            let absolute = self.text_start + raw.offset as u64;
            if absolute < self.emit_from {
                continue;
            }
            let end = absolute + raw.value.len() as u64;
            match self.covered_until.get_mut(&raw.pattern_type) {
                Some(covered) if absolute < *covered => continue,
                Some(covered) => *covered = end,
                None => {
                    self.covered_until.insert(raw.pattern_type.clone(), end);
                }
            }
            out.push((absolute, raw));
        }
    }
}

fn floor_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn next_boundary(text: &str, index: usize) -> usize {
    let mut index = (index + 1).min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
