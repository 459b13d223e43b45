//! Retrieval-style prompt compression
//!
//! Oversized prompts are cut into overlapping chunks, deduplicated, ranked
//! lexically against the instruction (or the code tail) and reassembled.

pub mod assembler;
pub mod chunker;
pub mod dedupe;
pub mod instruction;
pub mod pipeline;
pub mod ranker;

pub use assembler::{assemble, assemble_with_instruction, AssembledPrompt, AssemblyStats};
pub use chunker::{chunk, should_chunk, Chunk, Chunks};
pub use dedupe::{dedupe, fingerprint};
pub use instruction::split;
pub use pipeline::{compress_prompt, CompressionOutcome, CompressionReport, SkipReason, Strategy};
pub use ranker::{select_top_k, RankedChunk};
