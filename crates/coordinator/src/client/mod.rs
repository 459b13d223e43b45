//! Resilient client for the worker
//!
//! Every logical call passes, in order, the circuit breaker, the concurrency
//! throttle and a bounded retry loop with exponential backoff. Statistics are
//! updated along the way and can be read at any time without blocking callers.

pub mod circuit;
pub mod stats;
pub mod transport;

pub use circuit::CircuitBreaker;
pub use stats::{ClientStats, StatsSnapshot};
pub use transport::{
    AttemptFailure, BackendTransport, Disposition, EventReceiver, HttpTransport, SseParser,
};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tandem_common::config::CoordinatorConfig;
use tandem_common::metrics::CoordinatorMetrics;
use tandem_common::{Result, TandemError};
use tandem_proto::{
    BackendHealth, InferenceRequest, InferenceResponse, ModelsResponse, HEALTH_PATH, MODELS_PATH,
    STATS_PATH,
};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Retry, timeout and throttle tuning of a [`ResilientClient`]
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Attempts after the first one
    pub max_retries: u32,

    /// Upper bound of the exponential backoff
    pub backoff_cap: Duration,

    /// Deadline of one inference attempt
    pub request_timeout: Duration,

    /// Deadline of health, model and stats probes
    pub health_timeout: Duration,

    /// How long the circuit stays open after a failure
    pub circuit_cooldown: Duration,

    /// Calls allowed on the wire at once
    pub max_concurrent_calls: usize,

    /// Hard ceiling applied to requested `max_tokens`
    pub max_tokens_ceiling: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&CoordinatorConfig::default())
    }
}

impl From<&CoordinatorConfig> for ClientSettings {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_cap: config.backoff_cap(),
            request_timeout: config.request_timeout(),
            health_timeout: config.health_timeout(),
            circuit_cooldown: config.circuit_cooldown(),
            max_concurrent_calls: config.max_concurrent_calls,
            max_tokens_ceiling: config.max_tokens_ceiling,
        }
    }
}

impl ClientSettings {
    /// Delay before the attempt following the failed attempt `attempt` (zero-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(2u64.saturating_pow(attempt)).min(self.backoff_cap)
    }
}

/// Resilient remote-call client
///
/// Constructed once at startup and shared through `Arc`.
pub struct ResilientClient {
    transport: Arc<dyn BackendTransport>,
    settings: ClientSettings,
    circuit: CircuitBreaker,
    throttle: Arc<Semaphore>,
    stats: ClientStats,
    metrics: Option<CoordinatorMetrics>,
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn BackendTransport>, settings: ClientSettings) -> Self {
        Self {
            circuit: CircuitBreaker::new(settings.circuit_cooldown),
            throttle: Arc::new(Semaphore::new(settings.max_concurrent_calls.max(1))),
            stats: ClientStats::default(),
            metrics: None,
            transport,
            settings,
        }
    }

    /// Build an HTTP client for the configured worker
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self> {
        let settings = ClientSettings::from(config);
        let transport = HttpTransport::new(
            config.backend_endpoint.clone(),
            config.api_key.clone(),
            settings.health_timeout,
        )?;

        info!("Remote client initialized: {}", config.backend_endpoint);

        Ok(Self::new(Arc::new(transport), settings))
    }

    /// Export retries, circuit rejections and call latency to Prometheus
    pub fn with_metrics(mut self, metrics: CoordinatorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// Snapshot of the running statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn clamp(&self, mut request: InferenceRequest) -> InferenceRequest {
        let ceiling = self.settings.max_tokens_ceiling.max(1);
        if request.max_tokens > ceiling {
            debug!(
                requested = request.max_tokens,
                ceiling, "Clamping max_tokens to ceiling"
            );
        }
        request.max_tokens = request.max_tokens.clamp(1, ceiling);
        request
    }

    /// Run a blocking inference on the worker
    pub async fn inference(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        let request = self.clamp(request);
        let (response, _permit) = self.dispatch(|| self.transport.infer(&request)).await?;

        info!(
            model = %response.model,
            tokens = response.tokens_generated,
            remote_seconds = response.inference_time_seconds,
            "Remote inference successful"
        );

        Ok(response)
    }

    /// Open a streaming inference
    ///
    /// Opening follows the same circuit, throttle and retry policy as
    /// [`inference`](Self::inference). The throttle permit is held until the
    /// stream ends or the receiver is dropped.
    pub async fn inference_stream(&self, request: InferenceRequest) -> Result<EventReceiver> {
        let request = self.clamp(request);
        let (mut upstream, permit) = self.dispatch(|| self.transport.open_stream(&request)).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let _permit = permit;
            while let Some(event) = upstream.recv().await {
                let terminal = event.is_terminal();
                if tx.send(event).await.is_err() || terminal {
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// Circuit check, throttle and retry loop shared by every inference call
    async fn dispatch<T, F, Fut>(&self, attempt_once: F) -> Result<(T, OwnedSemaphorePermit)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptFailure>>,
    {
        self.fail_fast_if_open()?;

        let permit = self
            .throttle
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TandemError::internal("remote call throttle closed"))?;

        // Another call may have tripped the circuit while this one waited
        self.fail_fast_if_open()?;
        self.stats.record_sent();

        let started = Instant::now();
        let attempts = self.settings.max_retries + 1;
        let mut last_failure = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                if let Err(err) = self.fail_fast_if_open() {
                    self.stats.record_failure();
                    return Err(err);
                }
            }

            let deadline = self.settings.request_timeout;
            let outcome = match tokio::time::timeout(deadline, attempt_once()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AttemptFailure::Timeout(format!(
                    "no response within {}s",
                    deadline.as_secs()
                ))),
            };

            let failure = match outcome {
                Ok(value) => {
                    let elapsed = started.elapsed();
                    self.stats.record_success(elapsed);
                    if let Some(metrics) = &self.metrics {
                        metrics.remote_call_duration.observe(elapsed.as_secs_f64());
                    }
                    return Ok((value, permit));
                }
                Err(failure) => failure,
            };

            match failure.disposition() {
                Disposition::Terminal { trip_circuit } => {
                    self.stats.record_failure();
                    if trip_circuit {
                        self.circuit.trip();
                    }
                    error!(
                        kind = failure.label(),
                        attempt = attempt + 1,
                        trip_circuit,
                        "Remote call failed: {}",
                        failure
                    );
                    return Err(failure.into());
                }
                Disposition::Retry if attempt + 1 < attempts => {
                    let delay = self.settings.backoff(attempt);
                    self.stats.record_retry();
                    if let Some(metrics) = &self.metrics {
                        metrics.remote_retries.inc();
                    }
                    warn!(
                        kind = failure.label(),
                        attempt = attempt + 1,
                        max_retries = self.settings.max_retries,
                        backoff_secs = delay.as_secs(),
                        "Remote call failed, retrying: {}",
                        failure
                    );
                    tokio::time::sleep(delay).await;
                }
                Disposition::Retry => {}
            }

            last_failure = Some(failure);
        }

        self.stats.record_failure();
        self.circuit.trip();

        let err = match last_failure {
            Some(failure) => TandemError::from(failure),
            None => TandemError::internal("remote call made no attempts"),
        };
        error!(attempts, "Remote call failed after all attempts: {}", err);
        Err(err)
    }

    /// `Unavailable` without touching the network while the circuit is open
    fn fail_fast_if_open(&self) -> Result<()> {
        let Some(remaining) = self.circuit.remaining() else {
            return Ok(());
        };

        self.stats.record_circuit_rejection();
        if let Some(metrics) = &self.metrics {
            metrics.circuit_rejections.inc();
        }
        warn!(
            retry_in_secs = remaining.as_secs_f64(),
            "Circuit open, failing fast"
        );
        Err(TandemError::unavailable(format!(
            "worker circuit open, retry in {:.0}s",
            remaining.as_secs_f64().ceil()
        )))
    }

    /// GET a document with the short probe deadline
    async fn probe(&self, path: &str) -> std::result::Result<serde_json::Value, AttemptFailure> {
        match tokio::time::timeout(self.settings.health_timeout, self.transport.get(path)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AttemptFailure::Timeout(format!(
                "no response within {}s",
                self.settings.health_timeout.as_secs()
            ))),
        }
    }

    /// Worker health; failures are reported inside the result, never raised
    pub async fn check_health(&self) -> BackendHealth {
        let document = match self.probe(HEALTH_PATH).await {
            Ok(document) => document,
            Err(failure) => {
                warn!("Worker health check failed: {}", failure);
                return BackendHealth::unavailable(failure.to_string());
            }
        };

        serde_json::from_value(document).unwrap_or_else(|e| {
            warn!(error = %e, "Worker health response malformed");
            BackendHealth::unavailable(format!("malformed health response: {}", e))
        })
    }

    /// Whether the worker reports itself ready
    pub async fn is_available(&self) -> bool {
        self.check_health().await.available
    }

    /// Models known to and cached by the worker
    pub async fn list_models(&self) -> Result<ModelsResponse> {
        let document = self.probe(MODELS_PATH).await.map_err(|failure| {
            warn!("Failed to list worker models: {}", failure);
            TandemError::from(failure)
        })?;
        Ok(serde_json::from_value(document)?)
    }

    /// Raw worker statistics
    pub async fn remote_stats(&self) -> Result<serde_json::Value> {
        self.probe(STATS_PATH).await.map_err(|failure| {
            warn!("Failed to get worker stats: {}", failure);
            TandemError::from(failure)
        })
    }
}
