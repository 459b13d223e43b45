//! Metrics collection for Tandem
//!
//! This module provides Prometheus metrics for observability.
//! A registry is constructed once per process and shared through application state.

use crate::error::{Result, TandemError};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;
use std::time::Duration;

/// Metrics registry for Tandem
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub coordinator: CoordinatorMetrics,
    pub worker: WorkerMetrics,
}

/// Coordinator (front node) metrics
#[derive(Debug, Clone)]
pub struct CoordinatorMetrics {
    /// Client requests accepted by the admission gate
    pub requests_admitted: IntCounter,

    /// Client requests shed by the admission gate
    pub requests_rejected: IntCounter,

    /// Current number of admitted in-flight requests
    pub inflight_requests: IntGauge,

    /// Prompts replaced by a compressed version
    pub prompts_compressed: IntCounter,

    /// Prompts that were chunked but kept because reduction was insufficient
    pub compression_skipped: IntCounter,

    /// Fractional prompt reduction of adopted compressions
    pub prompt_reduction_ratio: Histogram,

    /// Remote call duration, all attempts included
    pub remote_call_duration: Histogram,

    /// Retry attempts issued by the remote client
    pub remote_retries: IntCounter,

    /// Calls failed fast by the circuit breaker
    pub circuit_rejections: IntCounter,
}

/// Worker (back node) metrics
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    /// Total number of inference requests
    pub inference_requests: IntCounter,

    /// Requests rejected by the capacity gate
    pub capacity_rejections: IntCounter,

    /// Model cache hits
    pub cache_hits: IntCounter,

    /// Model cache misses (loads)
    pub cache_misses: IntCounter,

    /// Models currently cached
    pub models_cached: IntGauge,

    /// Model load duration
    pub model_load_duration: Histogram,

    /// Tokens generated total
    pub tokens_generated_total: IntCounter,

    /// Generation duration
    pub generation_duration: Histogram,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        // Coordinator metrics
        let requests_admitted = IntCounter::new(
            "coordinator_requests_admitted_total",
            "Client requests accepted by the admission gate",
        )?;

        let requests_rejected = IntCounter::new(
            "coordinator_requests_rejected_total",
            "Client requests rejected by the admission gate",
        )?;

        let inflight_requests = IntGauge::new(
            "coordinator_inflight_requests",
            "Current number of admitted in-flight requests",
        )?;

        let prompts_compressed = IntCounter::new(
            "coordinator_prompts_compressed_total",
            "Prompts replaced by a compressed version",
        )?;

        let compression_skipped = IntCounter::new(
            "coordinator_compression_skipped_total",
            "Chunked prompts kept unmodified due to insufficient reduction",
        )?;

        let prompt_reduction_ratio = Histogram::with_opts(
            HistogramOpts::new(
                "coordinator_prompt_reduction_ratio",
                "Fractional prompt size reduction of adopted compressions",
            )
            .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9]),
        )?;

        let remote_call_duration = Histogram::with_opts(
            HistogramOpts::new(
                "coordinator_remote_call_duration_seconds",
                "Remote inference call duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        )?;

        let remote_retries = IntCounter::new(
            "coordinator_remote_retries_total",
            "Retry attempts issued by the remote client",
        )?;

        let circuit_rejections = IntCounter::new(
            "coordinator_circuit_rejections_total",
            "Calls failed fast by the circuit breaker",
        )?;

        // Worker metrics
        let inference_requests = IntCounter::new(
            "worker_inference_requests_total",
            "Total number of inference requests",
        )?;

        let capacity_rejections = IntCounter::new(
            "worker_capacity_rejections_total",
            "Requests rejected by the capacity gate",
        )?;

        let cache_hits = IntCounter::new("worker_model_cache_hits_total", "Model cache hits")?;

        let cache_misses =
            IntCounter::new("worker_model_cache_misses_total", "Model cache misses")?;

        let models_cached = IntGauge::new("worker_models_cached", "Models currently cached")?;

        let model_load_duration = Histogram::with_opts(
            HistogramOpts::new(
                "worker_model_load_duration_seconds",
                "Model load duration in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;

        let tokens_generated_total = IntCounter::new(
            "worker_tokens_generated_total",
            "Total number of tokens generated",
        )?;

        let generation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "worker_generation_duration_seconds",
                "Token generation duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(requests_admitted.clone()))?;
        registry.register(Box::new(requests_rejected.clone()))?;
        registry.register(Box::new(inflight_requests.clone()))?;
        registry.register(Box::new(prompts_compressed.clone()))?;
        registry.register(Box::new(compression_skipped.clone()))?;
        registry.register(Box::new(prompt_reduction_ratio.clone()))?;
        registry.register(Box::new(remote_call_duration.clone()))?;
        registry.register(Box::new(remote_retries.clone()))?;
        registry.register(Box::new(circuit_rejections.clone()))?;

        registry.register(Box::new(inference_requests.clone()))?;
        registry.register(Box::new(capacity_rejections.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(models_cached.clone()))?;
        registry.register(Box::new(model_load_duration.clone()))?;
        registry.register(Box::new(tokens_generated_total.clone()))?;
        registry.register(Box::new(generation_duration.clone()))?;

        let coordinator = CoordinatorMetrics {
            requests_admitted,
            requests_rejected,
            inflight_requests,
            prompts_compressed,
            compression_skipped,
            prompt_reduction_ratio,
            remote_call_duration,
            remote_retries,
            circuit_rejections,
        };

        let worker = WorkerMetrics {
            inference_requests,
            capacity_rejections,
            cache_hits,
            cache_misses,
            models_cached,
            model_load_duration,
            tokens_generated_total,
            generation_duration,
        };

        Ok(MetricsRegistry {
            registry,
            coordinator,
            worker,
        })
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| TandemError::internal(format!("Metrics output is not UTF-8: {}", e)))
    }
}

/// Run `f` and report how long it took
pub fn timed<F, R>(f: F) -> (R, Duration)
where
    F: FnOnce() -> R,
{
    let start = std::time::Instant::now();
    let result = f();
    (result, start.elapsed())
}

/// Helper trait for measuring latency
pub trait LatencyTimer {
    /// Observe the duration of a closure and return it with the result
    fn time<F, R>(&self, f: F) -> (R, Duration)
    where
        F: FnOnce() -> R;
}

impl LatencyTimer for Histogram {
    fn time<F, R>(&self, f: F) -> (R, Duration)
    where
        F: FnOnce() -> R,
    {
        let (result, elapsed) = timed(f);
        self.observe(elapsed.as_secs_f64());
        (result, elapsed)
    }
}
