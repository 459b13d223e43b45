//! Tandem wire protocol
//!
//! JSON payloads exchanged between clients, the coordinator and the worker.
//! Every inbound payload is validated at the boundary before it is used.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound for `max_tokens` accepted by the worker
pub const WORKER_MAX_TOKENS: u32 = 4096;

/// Upper bound for `max_tokens` accepted from clients by the coordinator
pub const CLIENT_MAX_TOKENS: u32 = 2048;

/// Highest sampling temperature accepted anywhere
pub const MAX_TEMPERATURE: f32 = 2.0;

/// Header carrying the shared key between coordinator and worker
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Path of the worker inference endpoint
pub const INFERENCE_PATH: &str = "/v1/inference";

/// Path of the worker streaming inference endpoint
pub const INFERENCE_STREAM_PATH: &str = "/v1/inference/stream";

/// Path of the health endpoint on both nodes
pub const HEALTH_PATH: &str = "/health";

/// Path of the worker model listing
pub const MODELS_PATH: &str = "/v1/models";

/// Path of the stats endpoint on both nodes
pub const STATS_PATH: &str = "/v1/stats";

// Inference Service types

/// Inference request sent from the coordinator to the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub prompt: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub stop: Vec<String>,
}

impl InferenceRequest {
    /// Check the request against the wire bounds
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        check_max_tokens(self.max_tokens, WORKER_MAX_TOKENS)?;
        check_temperature(self.temperature)
    }
}

/// Successful inference result returned by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub result: String,
    pub model: String,
    pub tokens_generated: u32,
    pub inference_time_seconds: f64,
    pub timestamp: String,
}

/// One server-sent event of a streaming inference
///
/// The variants are distinguished by their fields, matching the shapes on the
/// wire: `{token, total_tokens}`, `{error, done}` and `{done, total_tokens, ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Token {
        token: String,
        total_tokens: u32,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        done: bool,
    },
    Done {
        done: bool,
        total_tokens: u32,
        inference_time: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens_per_second: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

impl StreamEvent {
    /// Build a terminal error event
    pub fn error(error: impl Into<String>, message: Option<String>) -> Self {
        StreamEvent::Error {
            error: error.into(),
            message,
            done: true,
        }
    }

    /// Whether this event closes the stream
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Token { .. } => false,
            StreamEvent::Error { .. } => true,
            StreamEvent::Done { done, .. } => *done,
        }
    }
}

// Health check

/// Worker health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub available: bool,
    #[serde(default)]
    pub cpu_usage_percent: f32,
    #[serde(default)]
    pub ram_available_gb: f64,
    #[serde(default)]
    pub ram_used_gb: f64,
    #[serde(default)]
    pub models_in_cache: Vec<String>,
    #[serde(default)]
    pub uptime_seconds: f64,
}

/// Worker health as seen by the coordinator
///
/// Only `available` is required on the wire; probe failures are folded into
/// `status = "unavailable"` with the reason in `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    #[serde(default = "default_unknown_status")]
    pub status: String,
    #[serde(default)]
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl BackendHealth {
    /// Health report for a worker that could not be reached
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            status: "unavailable".to_string(),
            available: false,
            error: Some(error.into()),
            details: serde_json::Map::new(),
        }
    }
}

// Model management

/// Worker model listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelsResponse {
    #[serde(default)]
    pub available_models: Vec<String>,
    #[serde(default)]
    pub cached_models: Vec<String>,
    #[serde(default)]
    pub inference_counts: HashMap<String, u64>,
}

/// Result of a manual unload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnloadResponse {
    pub status: String,
    pub model: String,
}

/// Result of an idle sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub status: String,
    pub models_removed: usize,
    pub models_remaining: usize,
}

/// System readings reported by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub cpu_usage_percent: f32,
    pub ram_available_gb: f64,
    pub ram_used_gb: f64,
    pub uptime_seconds: f64,
}

/// Model cache statistics reported by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub cached: Vec<String>,
    pub count: usize,
    pub inference_counts: HashMap<String, u64>,
    pub last_used: HashMap<String, String>,
}

/// Worker `/v1/stats` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub system: SystemStats,
    pub models: ModelStats,
}

// Client-facing coordinator types

/// Code completion request accepted by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl CompletionRequest {
    /// Check the request against the client-facing bounds
    pub fn validate(&self) -> Result<(), String> {
        check_max_tokens(self.max_tokens, CLIENT_MAX_TOKENS)?;
        check_temperature(self.temperature)
    }
}

/// Code completion result returned by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub result: String,
    pub language: String,
    pub source: String,
    pub model_used: String,
    pub tokens_generated: u32,
    pub inference_time_seconds: f64,
    pub timestamp: String,
    pub compressed: bool,
}

/// Error body rendered by both nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

fn check_max_tokens(max_tokens: u32, limit: u32) -> Result<(), String> {
    if max_tokens == 0 || max_tokens > limit {
        return Err(format!("max_tokens must be between 1 and {}, got {}", limit, max_tokens));
    }
    Ok(())
}

fn check_temperature(temperature: f32) -> Result<(), String> {
    if !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
        return Err(format!(
            "temperature must be between 0.0 and {}, got {}",
            MAX_TEMPERATURE, temperature
        ));
    }
    Ok(())
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.2
}

fn default_language() -> String {
    "python".to_string()
}

fn default_unknown_status() -> String {
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_request_defaults() {
        let req: InferenceRequest =
            serde_json::from_str(r#"{"prompt": "def f():", "model": "qwen_7b"}"#).unwrap();

        assert_eq!(req.max_tokens, 512);
        assert!((req.temperature - 0.2).abs() < f32::EPSILON);
        assert!(req.stop.is_empty());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_inference_request_bounds() {
        let mut req = InferenceRequest {
            prompt: "x".to_string(),
            model: "qwen_7b".to_string(),
            max_tokens: 0,
            temperature: 0.2,
            stop: vec![],
        };
        assert!(req.validate().is_err());

        req.max_tokens = 4096;
        assert!(req.validate().is_ok());

        req.temperature = 2.5;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_completion_request_limit() {
        let req = CompletionRequest {
            prompt: "x".to_string(),
            language: "rust".to_string(),
            max_tokens: 4096,
            temperature: 0.2,
        };

        assert!(req.validate().unwrap_err().contains("2048"));
    }

    #[test]
    fn test_stream_event_shapes() {
        let token: StreamEvent =
            serde_json::from_str(r#"{"token": "foo", "total_tokens": 3}"#).unwrap();
        assert_eq!(
            token,
            StreamEvent::Token {
                token: "foo".to_string(),
                total_tokens: 3
            }
        );
        assert!(!token.is_terminal());

        let error: StreamEvent =
            serde_json::from_str(r#"{"error": "boom", "done": true}"#).unwrap();
        assert!(matches!(error, StreamEvent::Error { .. }));
        assert!(error.is_terminal());

        let done: StreamEvent = serde_json::from_str(
            r#"{"done": true, "total_tokens": 7, "inference_time": 1.5, "tokens_per_second": 4.67}"#,
        )
        .unwrap();
        assert!(matches!(done, StreamEvent::Done { total_tokens: 7, .. }));
        assert!(done.is_terminal());
    }

    #[test]
    fn test_backend_health_minimal_body() {
        let health: BackendHealth = serde_json::from_str(r#"{"available": true}"#).unwrap();
        assert!(health.available);
        assert_eq!(health.status, "unknown");

        let down = BackendHealth::unavailable("connection refused");
        let json = serde_json::to_value(&down).unwrap();
        assert_eq!(json["available"], false);
        assert_eq!(json["error"], "connection refused");
    }
}
