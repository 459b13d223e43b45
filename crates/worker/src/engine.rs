//! Inference engine seam
//!
//! The model cache only needs two things from an engine: turn a model file
//! into a loaded handle, and generate text from a loaded handle. Generation is
//! blocking and reports each token through a callback so the same call serves
//! both the blocking and the streaming endpoints.

use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tandem_common::config::EngineKind;
use tandem_common::{Result, TandemError};
use tandem_proto::InferenceRequest;
use tracing::debug;

/// Sampling parameters for one generation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
}

impl From<&InferenceRequest> for GenerationParams {
    fn from(request: &InferenceRequest) -> Self {
        Self {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: request.stop.clone(),
        }
    }
}

/// Result of a finished generation
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tokens: u32,
}

/// A model ready for generation
pub trait LoadedModel: Send + Sync {
    /// Size of the backing model file
    fn size_bytes(&self) -> u64;

    /// Generate a continuation of `prompt`
    ///
    /// `on_token` sees each token as it is produced; returning `false` stops
    /// generation early.
    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        on_token: &mut dyn FnMut(&str) -> bool,
    ) -> Result<Generation>;
}

/// Loads model files into handles
pub trait InferenceEngine: Send + Sync {
    fn load(&self, model_id: &str, path: &Path) -> Result<Arc<dyn LoadedModel>>;
}

/// Build the engine selected in configuration
pub fn engine_for(kind: EngineKind) -> Arc<dyn InferenceEngine> {
    match kind {
        EngineKind::Echo => Arc::new(MappedEchoEngine::default()),
    }
}

/// Development engine
///
/// Memory-maps the model file on load and answers with the trailing words of
/// the prompt, cycled until `max_tokens` or a stop sequence. Output is
/// deterministic; temperature is ignored.
#[derive(Debug, Clone)]
pub struct MappedEchoEngine {
    echo_words: usize,
}

impl MappedEchoEngine {
    pub fn new(echo_words: usize) -> Self {
        Self {
            echo_words: echo_words.max(1),
        }
    }
}

impl Default for MappedEchoEngine {
    fn default() -> Self {
        Self::new(8)
    }
}

impl InferenceEngine for MappedEchoEngine {
    fn load(&self, model_id: &str, path: &Path) -> Result<Arc<dyn LoadedModel>> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                TandemError::not_found(format!("Model file not found: {}", path.display()))
            }
            _ => TandemError::Io(e),
        })?;

        // SAFETY: the mapping is read-only and model files are not modified while served
        let mmap = unsafe { Mmap::map(&file)? };

        debug!(
            model = model_id,
            bytes = mmap.len(),
            "Mapped model file {}",
            path.display()
        );

        Ok(Arc::new(EchoModel {
            mmap,
            echo_words: self.echo_words,
        }))
    }
}

struct EchoModel {
    mmap: Mmap,
    echo_words: usize,
}

impl LoadedModel for EchoModel {
    fn size_bytes(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        on_token: &mut dyn FnMut(&str) -> bool,
    ) -> Result<Generation> {
        let words: Vec<&str> = prompt.split_whitespace().collect();
        let tail = &words[words.len().saturating_sub(self.echo_words)..];

        let mut text = String::new();
        let mut tokens = 0;

        if tail.is_empty() {
            return Ok(Generation { text, tokens });
        }

        for word in tail.iter().cycle() {
            if tokens >= params.max_tokens {
                break;
            }

            let token = format!(" {}", word);
            let before = text.len();
            text.push_str(&token);

            if let Some(cut) = earliest_stop(&text, &params.stop) {
                text.truncate(cut);
                if cut > before {
                    tokens += 1;
                    on_token(&text[before..]);
                }
                break;
            }

            tokens += 1;
            if !on_token(&token) {
                break;
            }
        }

        Ok(Generation { text, tokens })
    }
}

/// Byte offset of the first stop sequence occurrence in `text`
fn earliest_stop(text: &str, stop: &[String]) -> Option<usize> {
    stop.iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn model_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"GGUF fake weights").unwrap();
        file
    }

    fn params(max_tokens: u32, stop: &[&str]) -> GenerationParams {
        GenerationParams {
            max_tokens,
            temperature: 0.2,
            stop: stop.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn no_op(_: &str) -> bool {
        true
    }

    #[test]
    fn test_load_maps_file() {
        let file = model_file();
        let model = MappedEchoEngine::default().load("qwen_7b", file.path()).unwrap();
        assert_eq!(model.size_bytes(), 17);
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let err = MappedEchoEngine::default()
            .load("qwen_7b", Path::new("/nonexistent/qwen-7b-q4.gguf"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), tandem_common::ErrorKind::NotFound);
    }

    #[test]
    fn test_generation_honors_max_tokens() {
        let file = model_file();
        let model = MappedEchoEngine::new(2).load("m", file.path()).unwrap();

        let out = model
            .generate("def add(a, b):", &params(5, &[]), &mut no_op)
            .unwrap();

        assert_eq!(out.tokens, 5);
        assert_eq!(out.text, " add(a, b): add(a, b): add(a,");
    }

    #[test]
    fn test_generation_stops_at_stop_sequence() {
        let file = model_file();
        let model = MappedEchoEngine::new(3).load("m", file.path()).unwrap();

        let mut streamed = Vec::new();
        let out = model
            .generate(
                "x = compute(y)",
                &params(10, &["(y)"]),
                &mut |t: &str| {
                    streamed.push(t.to_string());
                    true
                },
            )
            .unwrap();

        assert_eq!(out.text, " x = compute");
        assert_eq!(out.tokens, 3);
        assert_eq!(streamed.concat(), out.text);
    }

    #[test]
    fn test_callback_can_cancel() {
        let file = model_file();
        let model = MappedEchoEngine::default().load("m", file.path()).unwrap();

        let mut seen = 0;
        let out = model
            .generate("a b c d", &params(100, &[]), &mut |_: &str| {
                seen += 1;
                seen < 2
            })
            .unwrap();

        assert_eq!(out.tokens, 2);
        assert_eq!(out.text, " a b");
    }

    #[test]
    fn test_empty_prompt_generates_nothing() {
        let file = model_file();
        let model = MappedEchoEngine::default().load("m", file.path()).unwrap();

        let out = model.generate("   ", &params(10, &[]), &mut no_op).unwrap();
        assert_eq!(out, Generation { text: String::new(), tokens: 0 });
    }
}
