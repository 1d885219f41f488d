//! Fixed-window text chunking
//!
//! Splits normalized document text into overlapping windows measured in
//! Unicode scalar values. Windows advance by `window - overlap` and the last
//! window may be shorter than `window`.

use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};

/// Default window size in characters
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default overlap between consecutive windows in characters
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// A contiguous span of a document's text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Position of this chunk within its document (0-based, dense)
    pub index: u32,
    pub text: String,
    /// Char offset of the first character
    pub start: usize,
    /// Char offset one past the last character
    pub end: usize,
}

/// Overlapping fixed-window chunker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    window: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker, rejecting `overlap >= window`
    pub fn new(window: usize, overlap: usize) -> Result<Self> {
        if window == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if overlap >= window {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                overlap, window
            )));
        }
        Ok(Self { window, overlap })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of consecutive windows
    pub fn stride(&self) -> usize {
        self.window - self.overlap
    }

    /// Split `text` into windows.
    ///
    /// Empty text yields no chunks; any non-empty text shorter than the
    /// window yields exactly one.
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        // Byte offset of every char boundary, plus the end of the string
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_len = boundaries.len() - 1;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < char_len {
            let end = (start + self.window).min(char_len);
            chunks.push(TextChunk {
                index: chunks.len() as u32,
                text: text[boundaries[start]..boundaries[end]].to_string(),
                start,
                end,
            });
            if end == char_len {
                break;
            }
            start += self.stride();
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            window: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_overlap_not_below_window() {
        assert!(matches!(
            Chunker::new(100, 100),
            Err(RagError::InvalidConfiguration(_))
        ));
        assert!(Chunker::new(100, 150).is_err());
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(100, 99).is_ok());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.split("hello world");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(Chunker::default().split("").is_empty());
    }

    #[test]
    fn test_windows_advance_by_stride() {
        let chunker = Chunker::new(10, 3).unwrap();
        let text: String = ('a'..='z').collect();
        let chunks = chunker.split(&text);

        let starts: Vec<usize> = chunks.iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![0, 7, 14, 21]);
        assert_eq!(chunks[0].text, "abcdefghij");
        assert_eq!(chunks[1].text, "hijklmnopq");
        // Final chunk is shorter than the window
        assert_eq!(chunks[3].text, "vwxyz");
    }

    #[test]
    fn test_exact_window_is_single_chunk() {
        let chunker = Chunker::new(5, 2).unwrap();
        let chunks = chunker.split("abcde");
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let chunker = Chunker::new(3, 1).unwrap();
        let chunks = chunker.split("héllo wörld");
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 3));
        assert_eq!(chunks[0].text, "hél");
        assert_eq!(chunks[1].text, "llo");
    }

    #[test]
    fn test_default_parameters() {
        let chunker = Chunker::default();
        assert_eq!(chunker.window(), 500);
        assert_eq!(chunker.overlap(), 100);
        let text = "x".repeat(1200);
        let starts: Vec<usize> = chunker.split(&text).iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![0, 400, 800]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn split_is_deterministic_and_covers_text(
            text in "[a-zé ]{0,400}",
            window in 1usize..60,
            overlap_seed in 0usize..60,
        ) {
            let overlap = overlap_seed % window;
            let chunker = Chunker::new(window, overlap).unwrap();

            let first = chunker.split(&text);
            let second = chunker.split(&text);
            prop_assert_eq!(&first, &second);

            let char_len = text.chars().count();
            if char_len == 0 {
                prop_assert!(first.is_empty());
            } else {
                prop_assert_eq!(first[0].start, 0);
                prop_assert_eq!(first.last().unwrap().end, char_len);
            }

            for (i, chunk) in first.iter().enumerate() {
                prop_assert_eq!(chunk.index as usize, i);
                prop_assert!(chunk.end - chunk.start <= window);
                prop_assert_eq!(chunk.text.chars().count(), chunk.end - chunk.start);
            }
            for pair in first.windows(2) {
                prop_assert_eq!(pair[1].start - pair[0].start, window - overlap);
            }
        }
    }
}
