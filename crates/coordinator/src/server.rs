//! Client-facing HTTP API
//!
//! Routes completions through admission control, the compression pipeline and
//! the resilient client. Health, metrics and the service descriptor bypass the
//! admission gate.

use crate::admission::AdmissionGate;
use crate::client::ResilientClient;
use crate::compression::{compress_prompt, CompressionOutcome, SkipReason, Strategy};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tandem_common::config::{CompressionConfig, CoordinatorConfig};
use tandem_common::{MetricsRegistry, Result, TandemConfig, TandemError};
use tandem_proto::{
    CompletionRequest, CompletionResponse, ErrorBody, InferenceRequest, StreamEvent,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};

/// Header carrying the per-request correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Paths that never count against the admission gate
const ADMISSION_BYPASS: [&str; 3] = ["/", "/health", "/metrics"];

/// Shared application state
pub struct AppState {
    pub client: Arc<ResilientClient>,
    pub gate: Arc<AdmissionGate>,
    pub coordinator: CoordinatorConfig,
    pub compression: CompressionConfig,
    pub metrics: MetricsRegistry,
    pub metrics_enabled: bool,
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        config: &TandemConfig,
        client: Arc<ResilientClient>,
        metrics: MetricsRegistry,
    ) -> Result<SharedState> {
        let coordinator = config.coordinator()?.clone();
        Ok(Arc::new(Self {
            gate: AdmissionGate::new(coordinator.max_inflight),
            client,
            coordinator,
            compression: config.compression.clone(),
            metrics,
            metrics_enabled: config.observability.enable_metrics,
            started_at: Instant::now(),
        }))
    }

    fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
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

/// Build the router with all coordinator routes
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/complete", post(complete_handler))
        .route("/v1/complete/stream", post(complete_stream_handler))
        .route("/v1/models", get(models_handler))
        .route("/v1/stats", get(stats_handler))
        .route("/v1/backend/health", post(backend_health_handler))
        .layer(middleware::from_fn_with_state(state.clone(), admission_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors_layer(&state.coordinator.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS policy for browser clients; `*` allows any origin
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        warn!("No valid CORS origins configured, cross-origin requests are refused");
        return layer;
    }
    layer.allow_origin(parsed)
}

/// Shed requests beyond the in-flight ceiling
async fn admission_middleware(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    if ADMISSION_BYPASS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let coordinator = &state.metrics.coordinator;
    let permit = match state.gate.enter() {
        Ok(permit) => permit,
        Err(e) => {
            coordinator.requests_rejected.inc();
            warn!(
                path = %req.uri().path(),
                inflight = state.gate.inflight(),
                "Request shed by admission gate"
            );
            return ApiError(e).into_response();
        }
    };

    coordinator.requests_admitted.inc();
    coordinator.inflight_requests.set(state.gate.inflight() as i64);

    let response = next.run(req).await;

    drop(permit);
    coordinator.inflight_requests.set(state.gate.inflight() as i64);
    response
}

/// Tag each request with an id and log its outcome
async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = info_span!("request", request_id = %request_id);
    let started = Instant::now();

    let mut response = next.run(req).instrument(span.clone()).await;

    span.in_scope(|| {
        info!(
            %method,
            %path,
            status = response.status().as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
    });

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// `GET /` service descriptor
async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": "tandem-coordinator",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "complete": "/v1/complete",
            "stream": "/v1/complete/stream",
            "models": "/v1/models",
            "stats": "/v1/stats",
            "backend_health": "/v1/backend/health",
            "metrics": "/metrics",
        }
    }))
}

/// `GET /health` coordinator status plus a worker probe
async fn health_handler(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let backend = state.client.check_health().await;
    let backend_status = if backend.available { "healthy" } else { "unavailable" };

    Json(json!({
        "status": "healthy",
        "coordinator_status": "operational",
        "backend_status": backend_status,
        "backend_available": backend.available,
        "uptime_seconds": state.uptime_seconds(),
    }))
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

/// Validated request ready for dispatch
struct Prepared {
    request: InferenceRequest,
    language: String,
    compressed: bool,
}

/// Boundary checks, compression and model routing shared by both completion routes
fn prepare(state: &AppState, payload: CompletionRequest) -> Result<Prepared> {
    payload.validate().map_err(TandemError::invalid_input)?;

    let prompt_chars = payload.prompt.chars().count();
    if prompt_chars > state.coordinator.max_prompt_chars {
        return Err(TandemError::prompt_too_large(format!(
            "prompt has {} characters, limit is {}",
            prompt_chars, state.coordinator.max_prompt_chars
        )));
    }

    info!(
        language = %payload.language,
        prompt_chars,
        "Completion request"
    );

    let outcome = compress_prompt(&payload.prompt, &state.compression);
    record_compression(&state.metrics, &outcome);
    let compressed = outcome.is_compressed();

    let model = state
        .coordinator
        .model_for_language(&payload.language.to_lowercase())
        .to_string();

    Ok(Prepared {
        request: InferenceRequest {
            prompt: outcome.prompt,
            model,
            max_tokens: payload.max_tokens,
            temperature: payload.temperature,
            stop: Vec::new(),
        },
        language: payload.language,
        compressed,
    })
}

fn record_compression(metrics: &MetricsRegistry, outcome: &CompressionOutcome) {
    let coordinator = &metrics.coordinator;
    match &outcome.strategy {
        Strategy::Compressed(report) => {
            coordinator.prompts_compressed.inc();
            coordinator
                .prompt_reduction_ratio
                .observe(report.stats.reduction_percent / 100.0);
        }
        Strategy::Passthrough(SkipReason::InsufficientReduction)
        | Strategy::Passthrough(SkipReason::InsufficientUniqueChunks) => {
            coordinator.compression_skipped.inc();
        }
        _ => {}
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// `POST /v1/complete`
async fn complete_handler(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<CompletionRequest>, JsonRejection>,
) -> std::result::Result<Json<CompletionResponse>, ApiError> {
    let Json(payload) = payload?;
    let started = Instant::now();
    let prepared = prepare(&state, payload)?;

    let response = state.client.inference(prepared.request).await?;

    Ok(Json(CompletionResponse {
        result: response.result,
        language: prepared.language,
        source: "worker".to_string(),
        model_used: response.model,
        tokens_generated: response.tokens_generated,
        inference_time_seconds: round3(started.elapsed().as_secs_f64()),
        timestamp: chrono::Utc::now().to_rfc3339(),
        compressed: prepared.compressed,
    }))
}

/// `POST /v1/complete/stream`
///
/// Worker failures are reported as a closing `{error, message, done}` event
/// rather than an HTTP error, since the client already expects a stream.
async fn complete_stream_handler(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<CompletionRequest>, JsonRejection>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>>, ApiError>
{
    let Json(payload) = payload?;
    let prepared = prepare(&state, payload)?;
    let model = prepared.request.model.clone();
    let language = prepared.language;

    let (tx, rx) = mpsc::channel::<StreamEvent>(64);
    let client = state.client.clone();

    tokio::spawn(async move {
        let started = Instant::now();
        let mut upstream = match client.inference_stream(prepared.request).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!("Streaming unavailable: {}", e);
                let _ = tx
                    .send(StreamEvent::error(e.kind().to_string(), Some(e.reason())))
                    .await;
                return;
            }
        };

        let mut tokens_received = 0u32;
        while let Some(event) = upstream.recv().await {
            let forwarded = match event {
                StreamEvent::Token { .. } => {
                    tokens_received += 1;
                    event
                }
                StreamEvent::Done { .. } => {
                    let inference_time = round3(started.elapsed().as_secs_f64());
                    info!(
                        tokens = tokens_received,
                        inference_time, "Stream complete"
                    );
                    StreamEvent::Done {
                        done: true,
                        total_tokens: tokens_received,
                        inference_time,
                        tokens_per_second: None,
                        language: Some(language.clone()),
                        model: Some(model.clone()),
                        timestamp: Some(chrono::Utc::now().to_rfc3339()),
                    }
                }
                StreamEvent::Error { error, message, .. } => {
                    warn!(error = %error, "Worker stream failed");
                    StreamEvent::error(error, message)
                }
            };

            let terminal = forwarded.is_terminal();
            if tx.send(forwarded).await.is_err() || terminal {
                break;
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `GET /v1/models`
async fn models_handler(State(state): State<SharedState>) -> Json<serde_json::Value> {
    match state.client.list_models().await {
        Ok(models) => Json(json!(models)),
        Err(e) => Json(json!({
            "error": e.reason(),
            "available_models": [],
        })),
    }
}

/// `GET /v1/stats`
async fn stats_handler(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let worker = match state.client.remote_stats().await {
        Ok(stats) => stats,
        Err(e) => json!({ "error": e.reason() }),
    };

    Json(json!({
        "coordinator": {
            "uptime_seconds": state.uptime_seconds(),
            "client": state.client.stats(),
            "inflight_requests": state.gate.inflight(),
            "max_inflight": state.gate.max_inflight(),
        },
        "worker": worker,
    }))
}

/// `POST /v1/backend/health` raw worker probe
async fn backend_health_handler(State(state): State<SharedState>) -> Json<tandem_proto::BackendHealth> {
    Json(state.client.check_health().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AttemptFailure, BackendTransport, ClientSettings, EventReceiver};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use parking_lot::Mutex;
    use tandem_proto::InferenceResponse;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    /// Worker double that echoes the prompt it received
    #[derive(Default)]
    struct EchoWorker {
        prompts: Mutex<Vec<InferenceRequest>>,
        gate: Option<Arc<Notify>>,
        down: bool,
    }

    #[async_trait]
    impl BackendTransport for EchoWorker {
        async fn infer(
            &self,
            request: &InferenceRequest,
        ) -> std::result::Result<InferenceResponse, AttemptFailure> {
            if self.down {
                return Err(AttemptFailure::AuthRejected("bad key".into()));
            }
            self.prompts.lock().push(request.clone());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(InferenceResponse {
                result: format!("echo {}", request.prompt.len()),
                model: request.model.clone(),
                tokens_generated: 2,
                inference_time_seconds: 0.01,
                timestamp: "2024-01-01T00:00:00Z".into(),
            })
        }

        async fn open_stream(
            &self,
            _request: &InferenceRequest,
        ) -> std::result::Result<EventReceiver, AttemptFailure> {
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                for token in ["def", " f"] {
                    let _ = tx
                        .send(StreamEvent::Token { token: token.into(), total_tokens: 1 })
                        .await;
                }
                let _ = tx
                    .send(StreamEvent::Done {
                        done: true,
                        total_tokens: 2,
                        inference_time: 0.5,
                        tokens_per_second: Some(4.0),
                        language: None,
                        model: None,
                        timestamp: None,
                    })
                    .await;
            });
            Ok(rx)
        }

        async fn get(&self, _path: &str) -> std::result::Result<serde_json::Value, AttemptFailure> {
            if self.down {
                return Err(AttemptFailure::Connect("refused".into()));
            }
            Ok(json!({"status": "healthy", "available": true}))
        }
    }

    fn state_with(worker: Arc<EchoWorker>) -> SharedState {
        let config = TandemConfig::defaults_for("coordinator");
        let metrics = MetricsRegistry::new().unwrap();
        let client = ResilientClient::new(worker, ClientSettings::default())
            .with_metrics(metrics.coordinator.clone());
        AppState::new(&config, Arc::new(client), metrics).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(state_with(Arc::new(EchoWorker::default())));

        let req = HttpRequest::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let body = body_json(response).await;
        assert_eq!(body["backend_status"], "healthy");
        assert_eq!(body["backend_available"], true);
    }

    #[tokio::test]
    async fn test_complete_routes_language_to_model() {
        let worker = Arc::new(EchoWorker::default());
        let app = build_router(state_with(worker.clone()));

        let response = app
            .oneshot(post_json(
                "/v1/complete",
                json!({"prompt": "fn main() {", "language": "Rust", "max_tokens": 2000}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["model_used"], "codellama_7b");
        assert_eq!(body["source"], "worker");
        assert_eq!(body["compressed"], false);

        let sent = worker.prompts.lock();
        assert_eq!(sent[0].prompt, "fn main() {");
        assert_eq!(sent[0].max_tokens, 512);
    }

    #[tokio::test]
    async fn test_oversized_prompt_rejected() {
        let worker = Arc::new(EchoWorker::default());
        let app = build_router(state_with(worker.clone()));

        let response = app
            .oneshot(post_json("/v1/complete", json!({"prompt": "x".repeat(16_001)})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = body_json(response).await;
        assert_eq!(body["error"], "prompt_too_large");
        assert!(worker.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_body_is_unprocessable() {
        let app = build_router(state_with(Arc::new(EchoWorker::default())));

        let response = app
            .oneshot(post_json("/v1/complete", json!({"prompt": "x", "temperature": 9.0})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"], "invalid_input");
    }

    #[tokio::test]
    async fn test_auth_failure_surfaces_as_bad_gateway() {
        let worker = Arc::new(EchoWorker {
            down: true,
            ..Default::default()
        });
        let app = build_router(state_with(worker));

        let response = app
            .oneshot(post_json("/v1/complete", json!({"prompt": "x = 1"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"], "auth_rejected");
    }

    #[tokio::test]
    async fn test_admission_gate_sheds_third_request() {
        let release = Arc::new(Notify::new());
        let worker = Arc::new(EchoWorker {
            gate: Some(release.clone()),
            ..Default::default()
        });
        let state = state_with(worker);

        // Hold both slots directly; requests in flight behave the same way
        let first = state.gate.enter().unwrap();
        let _second = state.gate.enter().unwrap();

        let app = build_router(state.clone());
        let response = app
            .clone()
            .oneshot(post_json("/v1/complete", json!({"prompt": "x = 1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "overloaded");

        // Health bypasses the gate
        let req = HttpRequest::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

        drop(first);
        release.notify_one();
        let response = app
            .oneshot(post_json("/v1/complete", json!({"prompt": "x = 1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.gate.inflight(), 1);
        assert_eq!(state.metrics.coordinator.requests_rejected.get(), 1);
    }

    #[tokio::test]
    async fn test_stream_forwards_tokens_and_closes() {
        let app = build_router(state_with(Arc::new(EchoWorker::default())));

        let response = app
            .oneshot(post_json(
                "/v1/complete/stream",
                json!({"prompt": "def", "language": "python"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        let events: Vec<serde_json::Value> = text
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(|d| serde_json::from_str(d).unwrap())
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["token"], "def");
        assert_eq!(events[2]["done"], true);
        assert_eq!(events[2]["total_tokens"], 2);
        assert_eq!(events[2]["model"], "qwen_7b");
        assert_eq!(events[2]["language"], "python");
    }

    #[tokio::test]
    async fn test_models_fallback_when_worker_down() {
        let worker = Arc::new(EchoWorker {
            down: true,
            ..Default::default()
        });
        let app = build_router(state_with(worker));

        let req = HttpRequest::builder().uri("/v1/models").body(Body::empty()).unwrap();
        let body = body_json(app.oneshot(req).await.unwrap()).await;

        assert!(body["error"].is_string());
        assert_eq!(body["available_models"], json!([]));
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let app = build_router(state_with(Arc::new(EchoWorker::default())));

        let req = HttpRequest::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("coordinator_requests_admitted_total"));
    }

    fn preflight(origin: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("OPTIONS")
            .uri("/v1/complete")
            .header("origin", origin)
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_any_origin_by_default() {
        let state = state_with(Arc::new(EchoWorker::default()));
        let app = build_router(state.clone());

        let response = app.oneshot(preflight("http://localhost:3000")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(state.gate.inflight(), 0);
        assert_eq!(state.metrics.coordinator.requests_admitted.get(), 0);
    }

    #[tokio::test]
    async fn test_cors_restricted_to_configured_origins() {
        let mut config = TandemConfig::defaults_for("coordinator");
        if let Some(coordinator) = config.coordinator.as_mut() {
            coordinator.cors_origins = vec!["https://ide.example.com".to_string()];
        }
        let metrics = MetricsRegistry::new().unwrap();
        let client = ResilientClient::new(Arc::new(EchoWorker::default()), ClientSettings::default());
        let app = build_router(AppState::new(&config, Arc::new(client), metrics).unwrap());

        let allowed = app
            .clone()
            .oneshot(preflight("https://ide.example.com"))
            .await
            .unwrap();
        assert_eq!(
            allowed.headers()["access-control-allow-origin"],
            "https://ide.example.com"
        );

        let refused = app.oneshot(preflight("https://evil.example.com")).await.unwrap();
        assert!(!refused.headers().contains_key("access-control-allow-origin"));
    }
}
