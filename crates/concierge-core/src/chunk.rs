//! Fixed-window text chunker with overlap.
//!
//! Splits extracted document text into overlapping windows measured in
//! characters (Unicode scalar values, not bytes). Consecutive windows
//! advance by `window_chars - overlap_chars`, so adjacent windows share
//! exactly `overlap_chars` characters. The sequence ends with the first
//! window that reaches the end of the text; that last window may be
//! shorter than `window_chars`. Windows made only of whitespace are
//! dropped before numbering.
//!
//! There is no sentence or paragraph awareness. The only boundary rule is
//! the optional URL protection ([`ChunkConfig::with_url_protection`]),
//! which extends a window rather than cut through an `http(s)://` link.
//!
//! # Example
//!
//! ```rust
//! use concierge_core::chunk::{chunk_text, ChunkConfig};
//!
//! let text = "a".repeat(2500);
//! let chunks = chunk_text("doc-1", &text, &ChunkConfig::default());
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text.chars().count(), 2000);
//! assert_eq!(chunks[1].text.chars().count(), 1000);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::Chunk;

pub const DEFAULT_WINDOW_CHARS: usize = 2000;
pub const DEFAULT_OVERLAP_CHARS: usize = 500;

/// Window geometry. Construction guarantees a positive step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    window_chars: usize,
    overlap_chars: usize,
    keep_urls_whole: bool,
}

impl ChunkConfig {
    /// Returns a validation error unless `0 <= overlap < window`.
    pub fn new(window_chars: usize, overlap_chars: usize) -> Result<Self> {
        if window_chars == 0 {
            return Err(Error::validation("chunk window must be > 0"));
        }
        if overlap_chars >= window_chars {
            return Err(Error::validation(format!(
                "chunk overlap ({}) must be smaller than the window ({})",
                overlap_chars, window_chars
            )));
        }
        Ok(Self {
            window_chars,
            overlap_chars,
            keep_urls_whole: false,
        })
    }

    /// When enabled, a window whose end would fall inside an `http://` or
    /// `https://` link is extended to the end of that link (by at most one
    /// extra window length). The next window still starts at the regular
    /// offset.
    pub fn with_url_protection(mut self, enabled: bool) -> Self {
        self.keep_urls_whole = enabled;
        self
    }

    pub fn window_chars(&self) -> usize {
        self.window_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    pub fn keeps_urls_whole(&self) -> bool {
        self.keep_urls_whole
    }

    fn step(&self) -> usize {
        self.window_chars - self.overlap_chars
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            window_chars: DEFAULT_WINDOW_CHARS,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
            keep_urls_whole: false,
        }
    }
}

/// Lazy iterator over the windows of a text. See [`windows`].
pub struct Windows<'a> {
    text: &'a str,
    /// Byte offset of every character, plus `text.len()` as a sentinel.
    offsets: Vec<usize>,
    config: ChunkConfig,
    next_start: usize,
    done: bool,
}

/// Iterate over the non-blank windows of `text`.
pub fn windows<'a>(text: &'a str, config: &ChunkConfig) -> Windows<'a> {
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    offsets.push(text.len());
    Windows {
        text,
        offsets,
        config: *config,
        next_start: 0,
        done: false,
    }
}

impl<'a> Windows<'a> {
    fn char_count(&self) -> usize {
        self.offsets.len() - 1
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.offsets[start]..self.offsets[end]]
    }

    fn char_at(&self, idx: usize) -> char {
        self.slice(idx, idx + 1).chars().next().unwrap_or(' ')
    }

    /// If the cut at `end` splits a link, move it to the end of the link.
    fn extend_over_url(&self, start: usize, end: usize) -> usize {
        let total = self.char_count();
        if end >= total || self.char_at(end - 1).is_whitespace() || self.char_at(end).is_whitespace()
        {
            return end;
        }

        let mut token_start = end;
        while token_start > start && !self.char_at(token_start - 1).is_whitespace() {
            token_start -= 1;
        }
        let head = self.slice(token_start, end);
        if !(head.contains("https://") || head.contains("http://")) {
            return end;
        }

        let limit = (end + self.config.window_chars).min(total);
        let mut new_end = end;
        while new_end < limit && !self.char_at(new_end).is_whitespace() {
            new_end += 1;
        }
        new_end
    }
}

impl<'a> Iterator for Windows<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let total = self.char_count();
        loop {
            if self.done || self.next_start >= total {
                self.done = true;
                return None;
            }

            let start = self.next_start;
            let mut end = (start + self.config.window_chars).min(total);
            if end < total && self.config.keep_urls_whole {
                end = self.extend_over_url(start, end);
            }
            if end == total {
                self.done = true;
            }
            self.next_start = start + self.config.step();

            let window = self.slice(start, end);
            if !window.trim().is_empty() {
                return Some(window);
            }
        }
    }
}

/// Split text into numbered chunks for `document_id`.
///
/// Indices are contiguous from 0 over the windows that survive the
/// blank filter. Identical input and config always yield identical output.
pub fn chunk_text(document_id: &str, text: &str, config: &ChunkConfig) -> Vec<Chunk> {
    windows(text, config)
        .enumerate()
        .map(|(i, w)| make_chunk(document_id, i as i64, w))
        .collect()
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_text(len: usize) -> String {
        (0..len)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    fn expected_count(len: usize, w: usize, o: usize) -> usize {
        (len - o).div_ceil(w - o)
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_window() {
        assert!(ChunkConfig::new(100, 100).is_err());
        assert!(ChunkConfig::new(100, 150).is_err());
        assert!(ChunkConfig::new(0, 0).is_err());
        assert!(ChunkConfig::new(100, 0).is_ok());
    }

    #[test]
    fn test_2500_chars_with_default_config() {
        let text = numbered_text(2500);
        let chunks = chunk_text("doc1", &text, &ChunkConfig::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, &text[0..2000]);
        assert_eq!(chunks[1].text, &text[1500..2500]);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_window_count_formula() {
        let config = ChunkConfig::new(10, 3).unwrap();
        for len in 4..200 {
            let text = numbered_text(len);
            let got = windows(&text, &config).count();
            assert_eq!(got, expected_count(len, 10, 3), "len = {}", len);
        }
    }

    #[test]
    fn test_windows_bounded_and_overlapping() {
        let config = ChunkConfig::new(12, 4).unwrap();
        let text = numbered_text(97);
        let ws: Vec<&str> = windows(&text, &config).collect();
        for w in &ws {
            assert!(w.chars().count() <= 12);
        }
        for pair in ws.windows(2) {
            let tail: String = pair[0].chars().skip(pair[0].chars().count() - 4).collect();
            let head: String = pair[1].chars().take(4).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let config = ChunkConfig::new(4, 1).unwrap();
        let text = "ãéíõúçàâ";
        let ws: Vec<&str> = windows(text, &config).collect();
        assert_eq!(ws, vec!["ãéíõ", "õúçà", "àâ"]);
    }

    #[test]
    fn test_short_text_single_window() {
        let config = ChunkConfig::new(10, 5).unwrap();
        let ws: Vec<&str> = windows("abc", &config).collect();
        assert_eq!(ws, vec!["abc"]);
    }

    #[test]
    fn test_empty_and_blank_text() {
        let config = ChunkConfig::default();
        assert!(chunk_text("doc1", "", &config).is_empty());
        assert!(chunk_text("doc1", "   \n\t  ", &config).is_empty());
    }

    #[test]
    fn test_blank_windows_dropped_and_indices_contiguous() {
        let config = ChunkConfig::new(5, 0).unwrap();
        let text = "hello          world";
        let chunks = chunk_text("doc1", text, &config);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "world"]);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = numbered_text(5000);
        let config = ChunkConfig::new(700, 100).unwrap();
        let c1 = chunk_text("doc1", &text, &config);
        let c2 = chunk_text("doc1", &text, &config);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }

    #[test]
    fn test_url_split_without_protection() {
        let config = ChunkConfig::new(20, 5).unwrap();
        let text = "see https://example.com/a/very/long/path now";
        let first = windows(text, &config).next().unwrap();
        assert_eq!(first, "see https://example.");
    }

    #[test]
    fn test_url_kept_whole_with_protection() {
        let config = ChunkConfig::new(20, 5).unwrap().with_url_protection(true);
        let text = "see https://example.com/a/very/long/path now";
        let first = windows(text, &config).next().unwrap();
        assert_eq!(first, "see https://example.com/a/very/long/path");
    }

    #[test]
    fn test_url_protection_ignores_plain_words() {
        let config = ChunkConfig::new(8, 2).unwrap().with_url_protection(true);
        let text = "abcdefghijklmnop";
        let first = windows(text, &config).next().unwrap();
        assert_eq!(first, "abcdefgh");
    }

    #[test]
    fn test_url_protection_markdown_link() {
        let config = ChunkConfig::new(20, 4).unwrap().with_url_protection(true);
        let text = "[Book](https://x.io/path?a=1&b=2) more";
        let first = windows(text, &config).next().unwrap();
        assert_eq!(first, "[Book](https://x.io/path?a=1&b=2)");
    }
}
