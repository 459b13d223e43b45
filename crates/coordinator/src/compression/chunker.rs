//! Overlapping fixed-size chunking
//!
//! Splits long text into windows of `max_chars` characters. Consecutive windows
//! share `overlap` characters so that the ranker sees context across boundaries.
//! All lengths and offsets are in characters, never bytes.

use super::dedupe::fingerprint;

/// Default window size in characters
pub const DEFAULT_MAX_CHARS: usize = 1000;

/// Default overlap between consecutive windows
pub const DEFAULT_OVERLAP: usize = 150;

/// Default length above which a text is worth chunking
pub const DEFAULT_CHUNK_THRESHOLD: usize = 1500;

/// A contiguous span of a chunked text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Start offset (characters, inclusive)
    pub start: usize,

    /// End offset (characters, exclusive)
    pub end: usize,

    /// Text of the span
    pub text: String,

    /// Content fingerprint over whitespace-normalized text
    pub fingerprint: u64,
}

impl Chunk {
    fn new(start: usize, end: usize, text: &str) -> Self {
        Self {
            start,
            end,
            text: text.to_string(),
            fingerprint: fingerprint(text),
        }
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Lazy iterator over the chunks of a text
///
/// Finite and not restartable; call [`chunk`] again to recompute.
#[derive(Debug)]
pub struct Chunks<'a> {
    text: &'a str,
    /// Byte offset of every character, plus `text.len()` as a sentinel
    boundaries: Vec<usize>,
    max_chars: usize,
    overlap: usize,
    next_start: Option<usize>,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.next_start?;
        let length = self.boundaries.len() - 1;
        let end = (start + self.max_chars).min(length);

        let span = &self.text[self.boundaries[start]..self.boundaries[end]];
        let chunk = Chunk::new(start, end, span);

        self.next_start = if end == length {
            None
        } else {
            // Step back by the overlap but always move forward by at least one character
            Some(end.saturating_sub(self.overlap).max(start + 1))
        };

        Some(chunk)
    }
}

/// Split `text` into overlapping windows
///
/// A text of at most `max_chars` characters yields exactly one chunk equal to
/// the input. A `max_chars` of zero is treated as one.
pub fn chunk(text: &str, max_chars: usize, overlap: usize) -> Chunks<'_> {
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();

    Chunks {
        text,
        boundaries,
        max_chars: max_chars.max(1),
        overlap,
        next_start: Some(0),
    }
}

/// Whether a text is long enough to be worth chunking
pub fn should_chunk(text: &str, threshold: usize) -> bool {
    text.chars().count() > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> String {
        (0..len)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    #[test]
    fn test_short_text_single_chunk() {
        for text in ["", "def f(): pass", &sample(1000)] {
            let chunks: Vec<Chunk> = chunk(text, 1000, 150).collect();
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].text, text);
            assert_eq!(chunks[0].start, 0);
        }
    }

    #[test]
    fn test_long_text_boundaries_and_overlap() {
        let text = sample(3333);
        let chunks: Vec<Chunk> = chunk(&text, 1000, 150).collect();

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, 3333);

        for chunk in &chunks {
            assert!(chunk.start < chunk.end);
            assert!(chunk.end <= 3333);
            assert_eq!(chunk.text, text[chunk.start..chunk.end]);
        }

        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end - pair[1].start, 150);
            assert_eq!(pair[0].char_len(), 1000);
        }
    }

    #[test]
    fn test_chunks_cover_text() {
        let text = sample(2500);
        let chunks: Vec<Chunk> = chunk(&text, 700, 100).collect();

        let mut covered = 0;
        for chunk in &chunks {
            assert!(chunk.start <= covered);
            covered = covered.max(chunk.end);
        }
        assert_eq!(covered, 2500);
    }

    #[test]
    fn test_overlap_not_smaller_than_window_terminates() {
        let text = sample(50);
        let chunks: Vec<Chunk> = chunk(&text, 10, 25).collect();

        // One character of progress per step: starts 0..=40
        assert_eq!(chunks.len(), 41);
        assert_eq!(chunks.last().unwrap().end, 50);
        assert!(chunks.windows(2).all(|p| p[1].start == p[0].start + 1));
    }

    #[test]
    fn test_zero_window_is_treated_as_one() {
        let chunks: Vec<Chunk> = chunk("abc", 0, 0).collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_multibyte_characters() {
        let text = "é".repeat(25) + &"日本".repeat(20);
        let chunks: Vec<Chunk> = chunk(&text, 30, 5).collect();

        assert_eq!(chunks[0].text.chars().count(), 30);
        assert_eq!(chunks.last().unwrap().end, 65);
        let tail: String = chunks[0].text.chars().skip(25).collect();
        assert_eq!(tail, "日本日本日");
        assert!(chunks[1].text.starts_with(&tail));
    }

    #[test]
    fn test_should_chunk_counts_characters() {
        assert!(!should_chunk(&"é".repeat(1500), 1500));
        assert!(should_chunk(&"é".repeat(1501), 1500));
    }
}
