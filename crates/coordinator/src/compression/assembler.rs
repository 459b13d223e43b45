//! Prompt assembly from selected chunks

use super::chunker::Chunk;
use serde::Serialize;

/// Default budget for the summed length of context blocks
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 2500;

const SYSTEM_PREAMBLE: &str =
    "You are an expert code assistant. Use the context below only if relevant.";

/// Size accounting for an assembled prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblyStats {
    pub original_chars: usize,
    pub chunks_selected: usize,
    pub final_chars: usize,
    /// Percentage saved, rounded to one decimal
    pub reduction_percent: f64,
}

impl AssemblyStats {
    pub fn new(original_chars: usize, chunks_selected: usize, final_chars: usize) -> Self {
        let reduction_percent = if original_chars == 0 {
            0.0
        } else {
            let ratio = 1.0 - final_chars as f64 / original_chars as f64;
            (ratio * 1000.0).round() / 10.0
        };

        Self {
            original_chars,
            chunks_selected,
            final_chars,
            reduction_percent,
        }
    }
}

/// A candidate replacement prompt
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub text: String,
    pub stats: AssemblyStats,
}

impl AssembledPrompt {
    pub fn new(text: String, original_chars: usize, chunks_selected: usize) -> Self {
        let stats = AssemblyStats::new(original_chars, chunks_selected, text.chars().count());
        Self { text, stats }
    }

    /// Whether at least `min_reduction` of the original length is saved
    pub fn meets_reduction(&self, min_reduction: f64) -> bool {
        (self.stats.final_chars as f64) < self.stats.original_chars as f64 * (1.0 - min_reduction)
    }
}

/// Wrap `user_text` with labeled context blocks
///
/// Blocks are added in order until the next one would push the summed chunk
/// length past `max_context_chars`. If no block fits, `user_text` is returned as is.
pub fn assemble(user_text: &str, chunks: &[Chunk], max_context_chars: usize) -> String {
    let mut blocks = Vec::new();
    let mut used = 0;

    for (i, chunk) in chunks.iter().enumerate() {
        let len = chunk.char_len();
        if used + len > max_context_chars {
            break;
        }
        blocks.push(format!("CONTEXT {}:\n{}", i + 1, chunk.text));
        used += len;
    }

    if blocks.is_empty() {
        return user_text.to_string();
    }

    format!(
        "SYSTEM:\n{}\n\n{}\n\nUSER:\n{}\n",
        SYSTEM_PREAMBLE,
        blocks.join("\n\n"),
        user_text
    )
}

/// Put `instruction` ahead of the code so base code models see it first
///
/// The code sits in a closed fence, followed by an open fence that primes the
/// model to answer with code only. An empty instruction joins the chunks with
/// blank lines and nothing else.
pub fn assemble_with_instruction<S: AsRef<str>>(chunks: &[S], instruction: &str) -> String {
    let code = chunks
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\n\n");

    if instruction.is_empty() {
        return code;
    }

    format!(
        "{}\n\nHere is the code to refactor:\n```\n{}\n```\n\nRefactored code:\n```\n",
        instruction, code
    )
}
