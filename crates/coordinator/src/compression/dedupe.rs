//! Fingerprint-based chunk deduplication
//!
//! Repeated boilerplate produces structurally identical chunks; only the first
//! occurrence of each fingerprint survives. Fingerprints are xxh64 (seed 0) over
//! whitespace-normalized text, so results are reproducible across processes.
//! Two distinct chunks with colliding fingerprints are treated as duplicates.

use super::chunker::Chunk;
use std::collections::HashSet;
use xxhash_rust::xxh64::Xxh64;

/// Fingerprint of `text` with whitespace runs collapsed and ends trimmed
pub fn fingerprint(text: &str) -> u64 {
    let mut hasher = Xxh64::new(0);
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            hasher.update(b" ");
        }
        hasher.update(word.as_bytes());
    }
    hasher.digest()
}

/// Drop chunks whose fingerprint was already seen, keeping order
pub fn dedupe(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::with_capacity(chunks.len());
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.fingerprint))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::chunker::chunk;

    fn chunks_of(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .flat_map(|t| chunk(t, 1000, 150).collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn test_fingerprint_normalizes_whitespace() {
        assert_eq!(fingerprint("fn  main()\n{ }"), fingerprint(" fn main() { }\n"));
        assert_ne!(fingerprint("fn main() {}"), fingerprint("fn main() { }"));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        // xxh64 with seed 0 of the empty input
        assert_eq!(fingerprint(""), 0xEF46_DB37_51D8_E999);
        assert_eq!(fingerprint("   \n\t"), fingerprint(""));
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence_in_order() {
        let chunks = chunks_of(&["alpha", "beta", "alpha ", "gamma", "beta"]);

        let unique = dedupe(chunks);
        let texts: Vec<&str> = unique.iter().map(|c| c.text.as_str()).collect();

        assert_eq!(texts, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let chunks = chunks_of(&["a b", "a  b", "c", "", "  ", "c", "d"]);

        let once = dedupe(chunks);
        let twice = dedupe(once.clone());

        assert_eq!(once, twice);
        assert_eq!(once.len(), 4);
    }
}
