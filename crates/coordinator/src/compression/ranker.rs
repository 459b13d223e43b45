//! Lexical relevance ranking
//!
//! Scores are the number of distinct lower-cased whitespace tokens shared by a
//! chunk and the query. No embeddings.

use super::chunker::Chunk;
use std::cmp::Reverse;
use std::collections::HashSet;

/// A chunk with its relevance score and position in the ranked input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub score: usize,
    pub index: usize,
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Count distinct tokens shared by `chunk` and `query`
pub fn score(chunk: &str, query: &str) -> usize {
    let query_tokens = tokenize(query);
    overlap(chunk, &query_tokens)
}

fn overlap(chunk: &str, query_tokens: &HashSet<String>) -> usize {
    tokenize(chunk)
        .iter()
        .filter(|token| query_tokens.contains(*token))
        .count()
}

/// Score every chunk against `query`, preserving input order
pub fn rank(chunks: Vec<Chunk>, query: &str) -> Vec<RankedChunk> {
    let query_tokens = tokenize(query);
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| RankedChunk {
            score: overlap(&chunk.text, &query_tokens),
            chunk,
            index,
        })
        .collect()
}

/// Keep the `k` most relevant chunks
///
/// With at most `k` chunks the input is returned unchanged. Otherwise chunks are
/// ordered by descending score; equal scores keep their original order.
pub fn select_top_k(chunks: Vec<Chunk>, query: &str, k: usize) -> Vec<Chunk> {
    if chunks.len() <= k {
        return chunks;
    }

    let mut ranked = rank(chunks, query);
    // sort_by_key is stable, so ties stay in input order
    ranked.sort_by_key(|r| Reverse(r.score));
    ranked.truncate(k);
    ranked.into_iter().map(|r| r.chunk).collect()
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

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_score_is_case_insensitive_set_overlap() {
        assert_eq!(score("Parse the CONFIG file", "parse config config"), 2);
        assert_eq!(score("a a a a", "a"), 1);
        assert_eq!(score("", "anything"), 0);
    }

    #[test]
    fn test_select_top_k_orders_by_score() {
        let chunks = chunks_of(&["nothing here", "add type hints", "type only", "hints and type and add"]);

        let top = select_top_k(chunks, "add type hints", 2);

        assert_eq!(texts(&top), vec!["add type hints", "hints and type and add"]);
    }

    #[test]
    fn test_select_top_k_ties_keep_input_order() {
        let chunks = chunks_of(&["one", "two", "three", "four"]);

        let top = select_top_k(chunks, "unrelated", 3);

        assert_eq!(texts(&top), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_select_top_k_bounds() {
        let chunks = chunks_of(&["x", "y"]);
        assert_eq!(select_top_k(chunks.clone(), "y", 5), chunks);
        assert_eq!(select_top_k(chunks.clone(), "y", 2), chunks);

        for k in 0..4 {
            let selected = select_top_k(chunks_of(&["a", "b", "c"]), "b", k);
            assert!(selected.len() <= k);
            assert!(selected.len() <= 3);
        }
    }

    #[test]
    fn test_rank_reports_original_index() {
        let ranked = rank(chunks_of(&["foo bar", "bar"]), "bar");
        assert_eq!(ranked[1].index, 1);
        assert_eq!(ranked[0].score, 1);
    }
}
