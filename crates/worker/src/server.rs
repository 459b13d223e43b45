//! Worker HTTP API
//!
//! Every route except `/health` and `/metrics` passes the capacity gate.
//! Inference, model management and stats also require the shared API key
//! and an allowed peer address.

use crate::capacity::{CapacityGate, ResourceMonitor, ResourceReading};
use crate::engine::GenerationParams;
use crate::model_cache::ModelCache;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem_common::metrics::{LatencyTimer, WorkerMetrics};
use tandem_common::{MetricsRegistry, Result, TandemConfig, TandemError};
use tandem_proto::{
    CleanupResponse, ErrorBody, HealthResponse, InferenceRequest, InferenceResponse,
    ModelsResponse, StreamEvent, SystemStats, UnloadResponse, WorkerStats, API_KEY_HEADER,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Paths that never pass the capacity gate
const CAPACITY_BYPASS: [&str; 2] = ["/health", "/metrics"];

/// Shared application state
pub struct AppState {
    pub cache: Arc<ModelCache>,
    pub monitor: Arc<dyn ResourceMonitor>,
    pub gate: CapacityGate,
    pub metrics: MetricsRegistry,
    pub metrics_enabled: bool,
    api_key: String,
    allowed_client_ips: Vec<IpAddr>,
    idle_eviction: Duration,
    started_at: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        config: &TandemConfig,
        cache: Arc<ModelCache>,
        monitor: Arc<dyn ResourceMonitor>,
        metrics: MetricsRegistry,
    ) -> Result<SharedState> {
        let worker = config.worker()?;

        let allowed_client_ips = worker
            .allowed_client_ips
            .iter()
            .map(|ip| {
                ip.parse::<IpAddr>()
                    .map_err(|_| TandemError::config(format!("Invalid client IP: {}", ip)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Arc::new(Self {
            cache,
            monitor,
            gate: CapacityGate::from_config(worker),
            metrics,
            metrics_enabled: config.observability.enable_metrics,
            api_key: worker.api_key.clone(),
            allowed_client_ips,
            idle_eviction: worker.idle_eviction(),
            started_at: Instant::now(),
        }))
    }

    fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Loopback always passes; otherwise the allowlist decides (empty = any)
    fn is_allowed_client(&self, peer: Option<IpAddr>) -> bool {
        match peer.map(|ip| ip.to_canonical()) {
            Some(ip) if ip.is_loopback() => true,
            _ if self.allowed_client_ips.is_empty() => true,
            Some(ip) => self.allowed_client_ips.contains(&ip),
            None => false,
        }
    }
}

/// Error rendered as `{error, message}` with the status of its kind
#[derive(Debug)]
pub struct ApiError(pub TandemError);

impl From<TandemError> for ApiError {
    fn from(err: TandemError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(TandemError::invalid_input(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.kind().to_string(),
            message: self.0.reason(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the router with all worker routes
pub fn build_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/v1/inference", post(inference_handler))
        .route("/v1/inference/stream", post(inference_stream_handler))
        .route("/v1/models", get(models_handler))
        .route("/v1/unload/{model}", post(unload_handler))
        .route("/v1/cleanup", post(cleanup_handler))
        .route("/v1/stats", get(stats_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), capacity_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reject work while the host is saturated
async fn capacity_middleware(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    if CAPACITY_BYPASS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    match state.gate.check(state.monitor.as_ref()) {
        Ok(_) => next.run(req).await,
        Err(e) => {
            state.metrics.worker.capacity_rejections.inc();
            warn!(path = %req.uri().path(), "Request rejected: {}", e.reason());
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": e.kind().as_str(),
                    "message": e.reason(),
                    "suggestion": "Fall back to local inference or retry later",
                })),
            )
                .into_response()
        }
    }
}

/// Check the API key and the peer address
async fn auth_middleware(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    let key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if key != Some(state.api_key.as_str()) {
        warn!(path = %req.uri().path(), "Rejected request with invalid API key");
        return forbidden("Invalid API key");
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    if !state.is_allowed_client(peer) {
        warn!(path = %req.uri().path(), ?peer, "Rejected request from disallowed client");
        return forbidden("Client IP not allowed");
    }

    next.run(req).await
}

fn forbidden(message: &str) -> Response {
    let body = ErrorBody {
        error: "auth_rejected".to_string(),
        message: message.to_string(),
    };
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

/// `GET /` service descriptor
async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": "tandem-worker",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "endpoints": {
            "inference": "/v1/inference",
            "stream": "/v1/inference/stream",
            "health": "/health",
            "models": "/v1/models",
            "stats": "/v1/stats",
        }
    }))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn system_stats(reading: &ResourceReading, uptime_seconds: f64) -> SystemStats {
    SystemStats {
        cpu_usage_percent: reading.cpu_percent,
        ram_available_gb: round2(reading.available_gb()),
        ram_used_gb: round2(reading.used_gb()),
        uptime_seconds,
    }
}

/// `GET /health`
async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let reading = state.monitor.sample();
    let available = state.gate.check_reading(&reading).is_ok();
    let system = system_stats(&reading, state.uptime_seconds());

    Json(HealthResponse {
        status: if available { "healthy" } else { "overloaded" }.to_string(),
        available,
        cpu_usage_percent: system.cpu_usage_percent,
        ram_available_gb: system.ram_available_gb,
        ram_used_gb: system.ram_used_gb,
        models_in_cache: state.cache.cached_models(),
        uptime_seconds: system.uptime_seconds,
    })
}

/// `GET /metrics` Prometheus exposition
async fn metrics_handler(State(state): State<SharedState>) -> std::result::Result<Response, ApiError> {
    if !state.metrics_enabled {
        return Err(TandemError::not_found("metrics are disabled").into());
    }
    let body = state.metrics.gather()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// Load the model and generate to completion
fn run_inference(
    cache: &ModelCache,
    metrics: &WorkerMetrics,
    request: &InferenceRequest,
) -> Result<InferenceResponse> {
    let model = cache.load(&request.model)?;

    let (generation, elapsed) = metrics.generation_duration.time(|| {
        model.generate(
            &request.prompt,
            &GenerationParams::from(request),
            &mut |_: &str| true,
        )
    });
    let generation = generation?;
    let elapsed = elapsed.as_secs_f64();

    metrics.tokens_generated_total.inc_by(u64::from(generation.tokens));
    cache.record_inference(&request.model);

    info!(
        model = %request.model,
        tokens = generation.tokens,
        "Inference complete in {:.2}s ({:.1} tokens/s)",
        elapsed,
        generation.tokens as f64 / elapsed.max(f64::EPSILON)
    );

    Ok(InferenceResponse {
        result: generation.text,
        model: request.model.clone(),
        tokens_generated: generation.tokens,
        inference_time_seconds: round3(elapsed),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Load the model and push each token to `tx`, closing with a done or error event
fn run_stream(
    cache: &ModelCache,
    metrics: &WorkerMetrics,
    request: &InferenceRequest,
    tx: &mpsc::Sender<StreamEvent>,
) {
    let fail = |e: TandemError| {
        error!(model = %request.model, "Streaming error: {}", e);
        let _ = tx.blocking_send(StreamEvent::error(e.kind().to_string(), Some(e.reason())));
    };

    let model = match cache.load(&request.model) {
        Ok(model) => model,
        Err(e) => return fail(e),
    };

    let mut total_tokens = 0u32;
    let (outcome, elapsed) = metrics.generation_duration.time(|| {
        model.generate(
            &request.prompt,
            &GenerationParams::from(request),
            &mut |token: &str| {
                total_tokens += 1;
                tx.blocking_send(StreamEvent::Token {
                    token: token.to_string(),
                    total_tokens,
                })
                .is_ok()
            },
        )
    });

    if let Err(e) = outcome {
        return fail(e);
    }

    let elapsed = elapsed.as_secs_f64();
    metrics.tokens_generated_total.inc_by(u64::from(total_tokens));
    cache.record_inference(&request.model);

    info!(
        model = %request.model,
        tokens = total_tokens,
        "Streaming complete in {:.2}s",
        elapsed
    );

    let _ = tx.blocking_send(StreamEvent::Done {
        done: true,
        total_tokens,
        inference_time: round3(elapsed),
        tokens_per_second: Some(round2(total_tokens as f64 / elapsed.max(f64::EPSILON))),
        language: None,
        model: None,
        timestamp: None,
    });
}

/// `POST /v1/inference`
async fn inference_handler(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<InferenceRequest>, JsonRejection>,
) -> std::result::Result<Json<InferenceResponse>, ApiError> {
    let Json(request) = payload?;
    request.validate().map_err(TandemError::invalid_input)?;

    state.metrics.worker.inference_requests.inc();
    info!(
        model = %request.model,
        prompt_chars = request.prompt.chars().count(),
        "Inference request"
    );

    let cache = state.cache.clone();
    let metrics = state.metrics.worker.clone();
    let response = tokio::task::spawn_blocking(move || run_inference(&cache, &metrics, &request))
        .await
        .map_err(|e| TandemError::internal(format!("Inference task failed: {}", e)))?
        .inspect_err(|e| error!("Inference error: {}", e))?;

    Ok(Json(response))
}

/// `POST /v1/inference/stream`
async fn inference_stream_handler(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<InferenceRequest>, JsonRejection>,
) -> std::result::Result<Response, ApiError> {
    let Json(request) = payload?;
    request.validate().map_err(TandemError::invalid_input)?;

    state.metrics.worker.inference_requests.inc();
    info!(
        model = %request.model,
        prompt_chars = request.prompt.chars().count(),
        "Streaming inference request"
    );

    let (tx, rx) = mpsc::channel::<StreamEvent>(64);
    let cache = state.cache.clone();
    let metrics = state.metrics.worker.clone();
    tokio::task::spawn_blocking(move || run_stream(&cache, &metrics, &request, &tx));

    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(SseEvent::default().data(data))
    });

    Ok((
        [("x-accel-buffering", "no")],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response())
}

/// `GET /v1/models`
async fn models_handler(State(state): State<SharedState>) -> Json<ModelsResponse> {
    let snapshot = state.cache.snapshot();
    Json(ModelsResponse {
        available_models: state.cache.available_models(),
        cached_models: snapshot.cached,
        inference_counts: snapshot.inference_counts,
    })
}

/// `POST /v1/unload/{model}`
async fn unload_handler(
    State(state): State<SharedState>,
    Path(model): Path<String>,
) -> std::result::Result<Json<UnloadResponse>, ApiError> {
    if !state.cache.unload(&model) {
        return Err(TandemError::not_found(format!("Model not in cache: {}", model)).into());
    }
    Ok(Json(UnloadResponse {
        status: "unloaded".to_string(),
        model,
    }))
}

/// `POST /v1/cleanup`
async fn cleanup_handler(State(state): State<SharedState>) -> Json<CleanupResponse> {
    let removed = state.cache.sweep(state.idle_eviction);
    Json(CleanupResponse {
        status: "cleaned".to_string(),
        models_removed: removed.len(),
        models_remaining: state.cache.len(),
    })
}

/// `GET /v1/stats`
async fn stats_handler(State(state): State<SharedState>) -> Json<WorkerStats> {
    let reading = state.monitor.sample();
    Json(WorkerStats {
        system: system_stats(&reading, state.uptime_seconds()),
        models: state.cache.snapshot(),
    })
}
