//! Prompt compression pipeline
//!
//! split instruction → chunk → dedupe → rank → assemble, adopting the result
//! only when it is meaningfully shorter than the input. The pipeline never
//! fails a request: every problem degrades to passing the prompt through.

use super::assembler::{assemble, assemble_with_instruction, AssembledPrompt, AssemblyStats};
use super::chunker::{chunk, should_chunk, Chunk};
use super::dedupe::dedupe;
use super::instruction::split_with_limit;
use super::ranker::select_top_k;
use tandem_common::config::CompressionConfig;
use tracing::{debug, info, warn};

/// Why a prompt was forwarded unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    InvalidConfig,
    BelowThreshold,
    InsufficientUniqueChunks,
    InsufficientReduction,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::InvalidConfig => "invalid_config",
            SkipReason::BelowThreshold => "below_threshold",
            SkipReason::InsufficientUniqueChunks => "insufficient_unique_chunks",
            SkipReason::InsufficientReduction => "insufficient_reduction",
        }
    }
}

/// Chunk accounting of an adopted compression
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionReport {
    pub total_chunks: usize,
    pub unique_chunks: usize,
    pub stats: AssemblyStats,
}

/// What the pipeline did to a prompt
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Passthrough(SkipReason),
    /// Short code re-ordered behind its instruction, not compressed
    InstructionFirst,
    Compressed(CompressionReport),
}

/// Prompt to forward and how it was produced
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionOutcome {
    pub prompt: String,
    pub strategy: Strategy,
}

impl CompressionOutcome {
    fn passthrough(prompt: &str, reason: SkipReason) -> Self {
        Self {
            prompt: prompt.to_string(),
            strategy: Strategy::Passthrough(reason),
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.strategy, Strategy::Compressed(_))
    }

    pub fn report(&self) -> Option<&CompressionReport> {
        match &self.strategy {
            Strategy::Compressed(report) => Some(report),
            _ => None,
        }
    }
}

/// Last `n` characters of `text`
fn char_tail(text: &str, n: usize) -> &str {
    let skip = text.chars().count().saturating_sub(n);
    match text.char_indices().nth(skip) {
        Some((offset, _)) => &text[offset..],
        None => "",
    }
}

/// Produce the prompt to forward for `prompt`
pub fn compress_prompt(prompt: &str, config: &CompressionConfig) -> CompressionOutcome {
    if !config.enabled {
        return CompressionOutcome::passthrough(prompt, SkipReason::Disabled);
    }
    if let Err(e) = config.validate() {
        warn!(error = %e, "Compression configuration invalid, forwarding prompt unchanged");
        return CompressionOutcome::passthrough(prompt, SkipReason::InvalidConfig);
    }

    let (code, instruction) = split_with_limit(prompt, config.instruction_scan_lines);

    if !should_chunk(&code, config.chunk_threshold_chars) {
        if instruction.is_empty() {
            return CompressionOutcome::passthrough(prompt, SkipReason::BelowThreshold);
        }
        debug!("Applied instruction-first prompt assembly");
        return CompressionOutcome {
            prompt: assemble_with_instruction(&[code.as_str()], &instruction),
            strategy: Strategy::InstructionFirst,
        };
    }

    let chunks: Vec<Chunk> =
        chunk(&code, config.max_chunk_chars, config.chunk_overlap_chars).collect();
    let total_chunks = chunks.len();
    let unique = dedupe(chunks);
    let unique_chunks = unique.len();

    info!(
        code_chars = code.chars().count(),
        total_chunks,
        unique_chunks,
        "Chunked oversized prompt"
    );

    let k = config.top_k.min(unique_chunks.saturating_sub(1));
    if k == 0 {
        info!("Compression skipped: insufficient unique chunks");
        return CompressionOutcome::passthrough(prompt, SkipReason::InsufficientUniqueChunks);
    }

    let (text, chunks_selected) = if instruction.is_empty() {
        // The code tail ranks the context; the user section keeps all of the code
        let query = char_tail(&code, config.query_tail_chars);
        let selected = select_top_k(unique, query, k);
        (assemble(&code, &selected, config.max_context_chars), selected.len())
    } else {
        let selected = select_top_k(unique, &instruction, k);
        let texts: Vec<&str> = selected.iter().map(|c| c.text.as_str()).collect();
        (assemble_with_instruction(&texts, &instruction), selected.len())
    };

    let assembled = AssembledPrompt::new(text, prompt.chars().count(), chunks_selected);
    if !assembled.meets_reduction(config.min_reduction) {
        info!(
            original_chars = assembled.stats.original_chars,
            final_chars = assembled.stats.final_chars,
            "Compression skipped: insufficient reduction"
        );
        return CompressionOutcome::passthrough(prompt, SkipReason::InsufficientReduction);
    }

    let stats = assembled.stats;
    info!(
        original_chars = stats.original_chars,
        final_chars = stats.final_chars,
        chunks_selected = stats.chunks_selected,
        reduction_percent = stats.reduction_percent,
        "Prompt compressed"
    );

    CompressionOutcome {
        prompt: assembled.text,
        strategy: Strategy::Compressed(CompressionReport {
            total_chunks,
            unique_chunks,
            stats,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boilerplate(lines: usize) -> String {
        format!("{:<49}\n", "result = handle(request)  # generated").repeat(lines)
    }

    #[test]
    fn test_short_prompt_passes_through() {
        let prompt = "x".repeat(500);

        let outcome = compress_prompt(&prompt, &CompressionConfig::default());

        assert_eq!(outcome.prompt, prompt);
        assert_eq!(outcome.strategy, Strategy::Passthrough(SkipReason::BelowThreshold));
    }

    #[test]
    fn test_short_code_with_instruction_is_reordered() {
        let prompt = "def f(x):\n    return x\n# TODO: add type hints";

        let outcome = compress_prompt(prompt, &CompressionConfig::default());

        assert_eq!(outcome.strategy, Strategy::InstructionFirst);
        assert!(outcome.prompt.starts_with("# TODO: add type hints"));
        assert!(outcome.prompt.contains("def f(x):\n    return x"));
    }

    #[test]
    fn test_repeated_boilerplate_is_compressed() {
        let prompt = boilerplate(100) + "# TODO: add type hints";

        let outcome = compress_prompt(&prompt, &CompressionConfig::default());
        let report = outcome.report().expect("compressed");

        assert!(report.unique_chunks < report.total_chunks);
        assert!(report.stats.chunks_selected <= 3);
        assert!((outcome.prompt.chars().count() as f64) < 0.9 * prompt.chars().count() as f64);

        let instruction_at = outcome.prompt.find("# TODO: add type hints").unwrap();
        let code_at = outcome.prompt.find("result = handle(request)").unwrap();
        assert!(instruction_at < code_at);
    }

    #[test]
    fn test_single_unique_chunk_is_not_compressed() {
        // Every window is identical, so only one unique chunk survives
        let prompt = "ab".repeat(2200);

        let outcome = compress_prompt(&prompt, &CompressionConfig::default());

        assert_eq!(outcome.prompt, prompt);
        assert_eq!(
            outcome.strategy,
            Strategy::Passthrough(SkipReason::InsufficientUniqueChunks)
        );
    }

    #[test]
    fn test_without_instruction_keeps_all_code() {
        let mut prompt = String::new();
        for i in 0..200 {
            prompt.push_str(&format!("fn helper_{i}() -> u32 {{ {i} }}\n"));
        }

        let outcome = compress_prompt(&prompt, &CompressionConfig::default());

        assert_eq!(
            outcome.strategy,
            Strategy::Passthrough(SkipReason::InsufficientReduction)
        );
        assert_eq!(outcome.prompt, prompt);
        for i in [0, 99, 199] {
            assert!(outcome.prompt.contains(&format!("fn helper_{i}()")));
        }
    }

    #[test]
    fn test_repeated_boilerplate_without_instruction_is_not_truncated() {
        let prompt = boilerplate(100);

        let outcome = compress_prompt(&prompt, &CompressionConfig::default());

        assert!(!outcome.is_compressed());
        assert_eq!(outcome.prompt, prompt);
    }

    #[test]
    fn test_invalid_config_degrades_to_passthrough() {
        let config = CompressionConfig {
            chunk_overlap_chars: 2000,
            ..CompressionConfig::default()
        };
        let prompt = boilerplate(100);

        let outcome = compress_prompt(&prompt, &config);

        assert_eq!(outcome.prompt, prompt);
        assert_eq!(outcome.strategy, Strategy::Passthrough(SkipReason::InvalidConfig));
    }

    #[test]
    fn test_disabled() {
        let config = CompressionConfig {
            enabled: false,
            ..CompressionConfig::default()
        };
        let prompt = boilerplate(100);

        assert_eq!(
            compress_prompt(&prompt, &config).strategy,
            Strategy::Passthrough(SkipReason::Disabled)
        );
    }

    #[test]
    fn test_default_config_matches_module_defaults() {
        use crate::compression::assembler::DEFAULT_MAX_CONTEXT_CHARS;
        use crate::compression::chunker::{DEFAULT_CHUNK_THRESHOLD, DEFAULT_MAX_CHARS, DEFAULT_OVERLAP};
        use crate::compression::instruction::DEFAULT_SCAN_LINES;

        let config = CompressionConfig::default();
        assert_eq!(config.max_chunk_chars, DEFAULT_MAX_CHARS);
        assert_eq!(config.chunk_overlap_chars, DEFAULT_OVERLAP);
        assert_eq!(config.chunk_threshold_chars, DEFAULT_CHUNK_THRESHOLD);
        assert_eq!(config.max_context_chars, DEFAULT_MAX_CONTEXT_CHARS);
        assert_eq!(config.instruction_scan_lines, DEFAULT_SCAN_LINES);
        assert_eq!(config.top_k, 3);
    }

    #[test]
    fn test_char_tail() {
        assert_eq!(char_tail("héllo", 3), "llo");
        assert_eq!(char_tail("héllo", 10), "héllo");
        assert_eq!(char_tail("abc", 0), "");
    }
}
