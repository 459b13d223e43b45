//! Model cache
//!
//! Loaded models are kept by identifier until they are unloaded or swept for
//! idleness. Only identifiers in the configured registry can be loaded.
//!
//! Each registered model has its own load lock. A cold load holds only that
//! lock, so readers of the entry map never wait on the engine.

use crate::engine::{InferenceEngine, LoadedModel};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tandem_common::metrics::{timed, WorkerMetrics};
use tandem_common::{Result, TandemError};
use tandem_proto::ModelStats;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// A cached model and its bookkeeping
struct CacheEntry {
    handle: Arc<dyn LoadedModel>,
    loaded_at: DateTime<Utc>,
    /// Monotonic, drives sweeps
    last_used: Instant,
    /// Wall clock, for reporting
    last_used_at: DateTime<Utc>,
    load_duration: Duration,
    inference_count: u64,
}

impl CacheEntry {
    fn touch(&mut self) {
        self.last_used = Instant::now();
        self.last_used_at = Utc::now();
    }
}

/// Registry-backed cache of loaded models
pub struct ModelCache {
    engine: Arc<dyn InferenceEngine>,
    registry: HashMap<String, PathBuf>,
    load_locks: HashMap<String, Mutex<()>>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    metrics: Option<WorkerMetrics>,
}

impl ModelCache {
    pub fn new(engine: Arc<dyn InferenceEngine>, registry: HashMap<String, PathBuf>) -> Self {
        let load_locks = registry
            .keys()
            .map(|id| (id.clone(), Mutex::new(())))
            .collect();

        Self {
            engine,
            registry,
            load_locks,
            entries: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: WorkerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Return the cached handle for `model_id`, loading it on a miss
    ///
    /// Concurrent misses for one model load it once; loads of different models
    /// proceed in parallel. Blocking; call from a blocking context.
    pub fn load(&self, model_id: &str) -> Result<Arc<dyn LoadedModel>> {
        if let Some(handle) = self.lookup(model_id) {
            return Ok(handle);
        }

        let (path, load_lock) = match (self.registry.get(model_id), self.load_locks.get(model_id)) {
            (Some(path), Some(lock)) => (path, lock),
            _ => {
                return Err(TandemError::not_found(format!(
                    "Unknown model: {}",
                    model_id
                )))
            }
        };

        let _loading = load_lock.lock();

        // Another caller may have finished the load while we waited
        if let Some(handle) = self.lookup(model_id) {
            return Ok(handle);
        }

        if !path.exists() {
            return Err(TandemError::not_found(format!(
                "Model file not found: {}",
                path.display()
            )));
        }

        info!(model = model_id, "Loading model from {}", path.display());
        let (loaded, load_duration) = timed(|| self.engine.load(model_id, path));
        let handle = loaded?;

        if let Some(metrics) = &self.metrics {
            metrics.cache_misses.inc();
            metrics.model_load_duration.observe(load_duration.as_secs_f64());
        }

        let now = Utc::now();
        let cached = {
            let mut entries = self.entries.lock();
            entries.insert(
                model_id.to_string(),
                CacheEntry {
                    handle: handle.clone(),
                    loaded_at: now,
                    last_used: Instant::now(),
                    last_used_at: now,
                    load_duration,
                    inference_count: 0,
                },
            );
            entries.len()
        };
        self.update_gauge(cached);

        info!(
            model = model_id,
            size_mb = handle.size_bytes() / (1024 * 1024),
            "Model loaded in {:.2}s",
            load_duration.as_secs_f64()
        );

        Ok(handle)
    }

    /// Cached handle for `model_id`, refreshing its idle clock
    fn lookup(&self, model_id: &str) -> Option<Arc<dyn LoadedModel>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(model_id)?;
        entry.touch();
        if let Some(metrics) = &self.metrics {
            metrics.cache_hits.inc();
        }
        debug!(model = model_id, "Model served from cache");
        Some(entry.handle.clone())
    }

    /// Remove `model_id`, returning whether it was cached
    pub fn unload(&self, model_id: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.remove(model_id) {
            Some(entry) => {
                self.update_gauge(entries.len());
                info!(
                    model = model_id,
                    resident_secs = (Utc::now() - entry.loaded_at).num_seconds(),
                    load_secs = entry.load_duration.as_secs_f64(),
                    inferences = entry.inference_count,
                    "Model unloaded from cache"
                );
                true
            }
            None => false,
        }
    }

    /// Evict every model idle for longer than `max_idle`
    pub fn sweep(&self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let mut idle: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_used) > max_idle)
            .map(|(id, _)| id.clone())
            .collect();
        idle.sort();

        for id in &idle {
            entries.remove(id);
            info!(
                model = %id,
                max_idle_minutes = max_idle.as_secs() / 60,
                "Evicted idle model"
            );
        }

        if !idle.is_empty() {
            self.update_gauge(entries.len());
        }
        idle
    }

    /// Count a completed inference against `model_id`
    pub fn record_inference(&self, model_id: &str) {
        if let Some(entry) = self.entries.lock().get_mut(model_id) {
            entry.inference_count += 1;
            entry.touch();
        }
    }

    /// Identifiers of cached models, sorted
    pub fn cached_models(&self) -> Vec<String> {
        let mut cached: Vec<String> = self.entries.lock().keys().cloned().collect();
        cached.sort();
        cached
    }

    /// Identifiers in the registry, sorted
    pub fn available_models(&self) -> Vec<String> {
        let mut available: Vec<String> = self.registry.keys().cloned().collect();
        available.sort();
        available
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-model counts and last-used times
    pub fn snapshot(&self) -> ModelStats {
        let entries = self.entries.lock();

        let mut cached: Vec<String> = entries.keys().cloned().collect();
        cached.sort();

        ModelStats {
            count: cached.len(),
            cached,
            inference_counts: entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry.inference_count))
                .collect(),
            last_used: entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry.last_used_at.to_rfc3339()))
                .collect(),
        }
    }

    /// Sweep on a fixed interval until the task is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, max_idle: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = cache.sweep(max_idle);
                if !evicted.is_empty() {
                    info!(count = evicted.len(), "Periodic sweep evicted models");
                }
            }
        })
    }

    fn update_gauge(&self, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.models_cached.set(count as i64);
        }
    }
}
