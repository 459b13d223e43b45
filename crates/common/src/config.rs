//! Configuration structures for Tandem
//!
//! This module defines all configuration types used by the coordinator and the worker.
//! Configurations are loaded from YAML files and can be overridden by environment variables.

use crate::error::{Result, TandemError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for Tandem components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TandemConfig {
    /// Mode: either "worker" or "coordinator"
    pub mode: String,

    /// Server binding address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    pub port: u16,

    /// Coordinator-specific configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Worker-specific configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerConfig>,

    /// Prompt compression tuning (coordinator only)
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Coordinator-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Base URL of the worker
    #[serde(default = "default_backend_endpoint")]
    pub backend_endpoint: String,

    /// Key sent to the worker in the `X-API-Key` header
    #[serde(default)]
    pub api_key: String,

    /// Maximum in-flight client requests before shedding load
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,

    /// Prompts longer than this (in characters) are rejected
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    /// Inference call timeout in seconds (covers cold model loads on the worker)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Health/status probe timeout in seconds
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound for a single backoff sleep in seconds
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,

    /// Fail-fast window after a recorded failure, in seconds
    #[serde(default = "default_circuit_cooldown")]
    pub circuit_cooldown_secs: u64,

    /// Network calls allowed in flight at once
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Hard ceiling applied to requested max_tokens
    #[serde(default = "default_max_tokens_ceiling")]
    pub max_tokens_ceiling: u32,

    /// Model used when the language is not in `language_models`
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Language to model routing table
    #[serde(default = "default_language_models")]
    pub language_models: HashMap<String, String>,

    /// Browser origins allowed by CORS; `*` allows any
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            backend_endpoint: default_backend_endpoint(),
            api_key: String::new(),
            max_inflight: default_max_inflight(),
            max_prompt_chars: default_max_prompt_chars(),
            request_timeout_secs: default_request_timeout(),
            health_timeout_secs: default_health_timeout(),
            max_retries: default_max_retries(),
            backoff_cap_secs: default_backoff_cap(),
            circuit_cooldown_secs: default_circuit_cooldown(),
            max_concurrent_calls: default_max_concurrent_calls(),
            max_tokens_ceiling: default_max_tokens_ceiling(),
            default_model: default_model(),
            language_models: default_language_models(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl CoordinatorConfig {
    /// Get inference timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get probe timeout as Duration
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    /// Get circuit cooldown as Duration
    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_cooldown_secs)
    }

    /// Get backoff cap as Duration
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }

    /// Resolve the model for a client language
    pub fn model_for_language(&self, language: &str) -> &str {
        self.language_models
            .get(&language.to_lowercase())
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }
}

/// Worker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Key expected in the `X-API-Key` header
    #[serde(default)]
    pub api_key: String,

    /// Reject work when CPU usage is above this percentage
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f32,

    /// Reject work when available memory is below this many bytes
    #[serde(default = "default_min_available_memory")]
    pub min_available_memory_bytes: u64,

    /// Peers allowed to call authenticated endpoints besides loopback (empty = any)
    #[serde(default)]
    pub allowed_client_ips: Vec<String>,

    /// Model registry: identifier to model file
    #[serde(default)]
    pub models: Vec<ModelEntry>,

    /// Idle threshold for cache sweeps, in minutes
    #[serde(default = "default_idle_eviction")]
    pub idle_eviction_minutes: u64,

    /// Periodic sweep interval in seconds (None = sweep only on demand)
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,

    /// Inference engine implementation
    #[serde(default)]
    pub engine: EngineKind,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_cpu_percent: default_max_cpu_percent(),
            min_available_memory_bytes: default_min_available_memory(),
            allowed_client_ips: Vec::new(),
            models: Vec::new(),
            idle_eviction_minutes: default_idle_eviction(),
            sweep_interval_secs: None,
            engine: EngineKind::default(),
        }
    }
}

impl WorkerConfig {
    /// Get idle eviction threshold as Duration
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_minutes * 60)
    }

    /// Registry as a lookup table
    pub fn model_registry(&self) -> HashMap<String, PathBuf> {
        self.models
            .iter()
            .map(|entry| (entry.id.clone(), entry.path.clone()))
            .collect()
    }
}

/// A registered model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Model identifier used on the wire (e.g., "qwen_7b")
    pub id: String,

    /// Path to the model file
    pub path: PathBuf,
}

/// Inference engine implementation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Memory-maps the model file and echoes the prompt tail
    #[default]
    Echo,
}

/// Prompt compression tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Enable the compression pipeline
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Code longer than this (in characters) is chunked
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold_chars: usize,

    /// Chunk window size in characters
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// Characters shared by consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap_chars: usize,

    /// Budget for context blocks when no instruction is present
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Maximum chunks kept after ranking
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum fractional reduction required to adopt a compressed prompt
    #[serde(default = "default_min_reduction")]
    pub min_reduction: f64,

    /// Trailing lines searched for an instruction marker
    #[serde(default = "default_instruction_scan_lines")]
    pub instruction_scan_lines: usize,

    /// Trailing characters of code used as ranking query without an instruction
    #[serde(default = "default_query_tail_chars")]
    pub query_tail_chars: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_threshold_chars: default_chunk_threshold(),
            max_chunk_chars: default_max_chunk_chars(),
            chunk_overlap_chars: default_chunk_overlap(),
            max_context_chars: default_max_context_chars(),
            top_k: default_top_k(),
            min_reduction: default_min_reduction(),
            instruction_scan_lines: default_instruction_scan_lines(),
            query_tail_chars: default_query_tail_chars(),
        }
    }
}

impl CompressionConfig {
    /// Validate compression tuning
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_chars == 0 {
            return Err(TandemError::config("max_chunk_chars must be positive"));
        }
        if self.chunk_overlap_chars >= self.max_chunk_chars {
            return Err(TandemError::config(format!(
                "chunk_overlap_chars ({}) must be smaller than max_chunk_chars ({})",
                self.chunk_overlap_chars, self.max_chunk_chars
            )));
        }
        if !(0.0..1.0).contains(&self.min_reduction) {
            return Err(TandemError::config(format!(
                "min_reduction must be in [0, 1), got {}",
                self.min_reduction
            )));
        }
        Ok(())
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Emit JSON log lines
    #[serde(default)]
    pub structured_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: true,
            structured_logging: false,
        }
    }
}

/// Default value functions
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_endpoint() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_max_inflight() -> usize {
    2
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_prompt_chars() -> usize {
    16_000
}

fn default_request_timeout() -> u64 {
    120
}

fn default_health_timeout() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_cap() -> u64 {
    8
}

fn default_circuit_cooldown() -> u64 {
    30
}

fn default_max_concurrent_calls() -> usize {
    1
}

fn default_max_tokens_ceiling() -> u32 {
    512
}

fn default_model() -> String {
    "qwen_7b".to_string()
}

fn default_language_models() -> HashMap<String, String> {
    [
        ("python", "qwen_7b"),
        ("javascript", "qwen_7b"),
        ("typescript", "qwen_7b"),
        ("rust", "codellama_7b"),
        ("go", "codellama_7b"),
        ("c", "codellama_7b"),
        ("cpp", "codellama_7b"),
    ]
    .into_iter()
    .map(|(lang, model)| (lang.to_string(), model.to_string()))
    .collect()
}

fn default_max_cpu_percent() -> f32 {
    70.0
}

fn default_min_available_memory() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_idle_eviction() -> u64 {
    30
}

fn default_chunk_threshold() -> usize {
    1500
}

fn default_max_chunk_chars() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    150
}

fn default_max_context_chars() -> usize {
    2500
}

fn default_top_k() -> usize {
    3
}

fn default_min_reduction() -> f64 {
    0.10
}

fn default_instruction_scan_lines() -> usize {
    12
}

fn default_query_tail_chars() -> usize {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl TandemConfig {
    /// Load configuration from a YAML file, apply environment overrides and validate
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| TandemError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let mut config: TandemConfig = serde_yaml::from_str(&content)
            .map_err(|e| TandemError::Config(format!("Failed to parse config file {}: {}", path.display(), e)))?;

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration for `mode`, without consulting the environment
    pub fn defaults_for(mode: &str) -> Self {
        TandemConfig {
            mode: mode.to_string(),
            bind_address: default_bind_address(),
            port: if mode == "worker" { 9000 } else { 7000 },
            coordinator: (mode == "coordinator").then(CoordinatorConfig::default),
            worker: (mode == "worker").then(WorkerConfig::default),
            compression: CompressionConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }

    /// Build a configuration for `mode` from defaults and environment variables only
    pub fn from_env(mode: &str) -> Result<Self> {
        let mut config = Self::defaults_for(mode);
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TANDEM_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("TANDEM_BIND_ADDRESS") {
            self.bind_address = addr;
        }
        if let Some(port) = lookup("TANDEM_PORT") {
            self.port = port
                .parse()
                .map_err(|_| TandemError::config(format!("Invalid port number: {}", port)))?;
        }

        if let Some(coordinator) = self.coordinator.as_mut() {
            if let Some(endpoint) = lookup("TANDEM_BACKEND_ENDPOINT") {
                coordinator.backend_endpoint = endpoint;
            }
            if let Some(key) = lookup("TANDEM_API_KEY") {
                coordinator.api_key = key;
            }
            if let Some(max) = lookup("TANDEM_MAX_INFLIGHT") {
                coordinator.max_inflight = max
                    .parse()
                    .map_err(|_| TandemError::config(format!("Invalid TANDEM_MAX_INFLIGHT: {}", max)))?;
            }
        }

        if let Some(worker) = self.worker.as_mut() {
            if let Some(key) = lookup("TANDEM_API_KEY") {
                worker.api_key = key;
            }
            if let Some(cpu) = lookup("TANDEM_MAX_CPU_PERCENT") {
                worker.max_cpu_percent = cpu
                    .parse()
                    .map_err(|_| TandemError::config(format!("Invalid TANDEM_MAX_CPU_PERCENT: {}", cpu)))?;
            }
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.mode.as_str() {
            "worker" => {
                let worker = self
                    .worker
                    .as_ref()
                    .ok_or_else(|| TandemError::config("Worker config required for worker mode"))?;
                if worker.api_key.is_empty() {
                    return Err(TandemError::config(
                        "Worker api_key is not set (use TANDEM_API_KEY)",
                    ));
                }
                if !(0.0..=100.0).contains(&worker.max_cpu_percent) {
                    return Err(TandemError::config(format!(
                        "max_cpu_percent must be within 0-100, got {}",
                        worker.max_cpu_percent
                    )));
                }
            }
            "coordinator" => {
                let coordinator = self.coordinator.as_ref().ok_or_else(|| {
                    TandemError::config("Coordinator config required for coordinator mode")
                })?;
                if coordinator.max_inflight == 0 {
                    return Err(TandemError::config("max_inflight must be at least 1"));
                }
                if coordinator.max_concurrent_calls == 0 {
                    return Err(TandemError::config("max_concurrent_calls must be at least 1"));
                }
                self.compression.validate()?;
            }
            _ => {
                return Err(TandemError::config(format!("Invalid mode: {}", self.mode)));
            }
        }
        Ok(())
    }

    /// Get coordinator section
    pub fn coordinator(&self) -> Result<&CoordinatorConfig> {
        self.coordinator
            .as_ref()
            .ok_or_else(|| TandemError::config("Coordinator config not found"))
    }

    /// Get worker section
    pub fn worker(&self) -> Result<&WorkerConfig> {
        self.worker
            .as_ref()
            .ok_or_else(|| TandemError::config("Worker config not found"))
    }

    /// Socket address string to bind
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
