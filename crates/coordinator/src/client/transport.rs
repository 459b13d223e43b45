//! Transport seam between the resilient client and the worker
//!
//! The retry loop never sees HTTP details: every attempt ends in either a
//! decoded payload or an [`AttemptFailure`] whose [`disposition`] tells the loop
//! what to do next.
//!
//! [`disposition`]: AttemptFailure::disposition

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tandem_common::TandemError;
use tandem_proto::{
    InferenceRequest, InferenceResponse, StreamEvent, API_KEY_HEADER, INFERENCE_PATH,
    INFERENCE_STREAM_PATH,
};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Events of an open stream; transport errors arrive as terminal error events
pub type EventReceiver = mpsc::Receiver<StreamEvent>;

/// Outcome of one failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The attempt exceeded its deadline
    Timeout(String),

    /// The worker could not be reached
    Connect(String),

    /// The worker shed the request (HTTP 503)
    Overloaded(String),

    /// The worker rejected our credentials or address (HTTP 401/403)
    AuthRejected(String),

    /// Any other non-success status
    RemoteStatus { status: u16, body: String },

    /// The worker answered 200 with a body we could not decode
    Protocol(String),
}

/// What the retry loop does after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Back off and try again while attempts remain
    Retry,

    /// Stop now, optionally opening the circuit
    Terminal { trip_circuit: bool },
}

impl AttemptFailure {
    pub fn disposition(&self) -> Disposition {
        match self {
            AttemptFailure::Timeout(_)
            | AttemptFailure::Connect(_)
            | AttemptFailure::RemoteStatus { .. }
            | AttemptFailure::Protocol(_) => Disposition::Retry,
            AttemptFailure::Overloaded(_) => Disposition::Terminal { trip_circuit: true },
            AttemptFailure::AuthRejected(_) => Disposition::Terminal { trip_circuit: false },
        }
    }

    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            AttemptFailure::Timeout(_) => "timeout",
            AttemptFailure::Connect(_) => "connect",
            AttemptFailure::Overloaded(_) => "overloaded",
            AttemptFailure::AuthRejected(_) => "auth_rejected",
            AttemptFailure::RemoteStatus { .. } => "remote_status",
            AttemptFailure::Protocol(_) => "protocol",
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            503 => AttemptFailure::Overloaded(body),
            401 | 403 => AttemptFailure::AuthRejected(body),
            _ => AttemptFailure::RemoteStatus { status, body },
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AttemptFailure::Timeout(e.to_string())
        } else if e.is_connect() {
            AttemptFailure::Connect(e.to_string())
        } else if e.is_decode() {
            AttemptFailure::Protocol(e.to_string())
        } else {
            AttemptFailure::Connect(e.to_string())
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Timeout(msg) => write!(f, "worker timeout: {}", msg),
            AttemptFailure::Connect(msg) => write!(f, "cannot connect to worker: {}", msg),
            AttemptFailure::Overloaded(msg) => write!(f, "worker overloaded: {}", msg),
            AttemptFailure::AuthRejected(msg) => {
                write!(f, "worker rejected credentials, check the API key: {}", msg)
            }
            AttemptFailure::RemoteStatus { status, body } => {
                write!(f, "worker returned status {}: {}", status, body)
            }
            AttemptFailure::Protocol(msg) => write!(f, "malformed worker response: {}", msg),
        }
    }
}

impl From<AttemptFailure> for TandemError {
    fn from(failure: AttemptFailure) -> Self {
        let reason = failure.to_string();
        match failure {
            AttemptFailure::Timeout(_) | AttemptFailure::Connect(_) => {
                TandemError::unavailable(reason)
            }
            AttemptFailure::Overloaded(_) => TandemError::overloaded(reason),
            AttemptFailure::AuthRejected(_) => TandemError::auth_rejected(reason),
            AttemptFailure::RemoteStatus { .. } | AttemptFailure::Protocol(_) => {
                TandemError::remote_inference(reason)
            }
        }
    }
}

/// One network exchange with the worker, without retries
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Run a blocking inference
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, AttemptFailure>;

    /// Open a streaming inference; succeeds once the worker accepted the request
    async fn open_stream(&self, request: &InferenceRequest) -> Result<EventReceiver, AttemptFailure>;

    /// GET a JSON document from `path`
    async fn get(&self, path: &str) -> Result<serde_json::Value, AttemptFailure>;
}

/// HTTP/JSON transport over reqwest
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, TandemError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TandemError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn post(
        &self,
        path: &str,
        request: &InferenceRequest,
    ) -> Result<reqwest::Response, AttemptFailure> {
        let response = self
            .client
            .post(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(AttemptFailure::from_reqwest)?;

        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AttemptFailure> {
    let status = response.status().as_u16();
    if status == 200 {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AttemptFailure::from_status(status, body))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AttemptFailure> {
    let bytes = response.bytes().await.map_err(AttemptFailure::from_reqwest)?;
    serde_json::from_slice(&bytes).map_err(|e| AttemptFailure::Protocol(e.to_string()))
}

#[async_trait]
impl BackendTransport for HttpTransport {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, AttemptFailure> {
        let response = self.post(INFERENCE_PATH, request).await?;
        decode(response).await
    }

    async fn open_stream(&self, request: &InferenceRequest) -> Result<EventReceiver, AttemptFailure> {
        let response = self.post(INFERENCE_STREAM_PATH, request).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "Worker stream interrupted");
                        let _ = tx
                            .send(StreamEvent::error("stream_interrupted", Some(e.to_string())))
                            .await;
                        return;
                    }
                };

                for event in parser.feed(&bytes) {
                    let terminal = event.is_terminal();
                    if tx.send(event).await.is_err() || terminal {
                        return;
                    }
                }
            }

            // Body ended without a closing event
            let _ = tx
                .send(StreamEvent::error(
                    "stream_interrupted",
                    Some("worker closed the stream early".to_string()),
                ))
                .await;
        });

        Ok(rx)
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value, AttemptFailure> {
        let response = self
            .client
            .get(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(AttemptFailure::from_reqwest)?;

        decode(check_status(response).await?).await
    }
}

/// Incremental parser for `data:` lines of a server-sent event body
///
/// Bytes are buffered until a full line arrives, so characters split across
/// network reads decode intact.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Append raw bytes and return every complete event decoded so far
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]);
            let line = line.trim_end_matches('\r');

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }

            match serde_json::from_str::<StreamEvent>(data) {
                Ok(event) => events.push(event),
                Err(e) => trace!(error = %e, data = %data, "Ignoring unparseable SSE data"),
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            AttemptFailure::from_status(503, "busy".into()),
            AttemptFailure::Overloaded("busy".into())
        );
        assert_eq!(
            AttemptFailure::from_status(403, String::new()).disposition(),
            Disposition::Terminal { trip_circuit: false }
        );
        assert_eq!(
            AttemptFailure::from_status(500, "boom".into()).disposition(),
            Disposition::Retry
        );
    }

    #[test]
    fn test_dispositions() {
        assert_eq!(AttemptFailure::Timeout("t".into()).disposition(), Disposition::Retry);
        assert_eq!(AttemptFailure::Connect("c".into()).disposition(), Disposition::Retry);
        assert_eq!(AttemptFailure::Protocol("p".into()).disposition(), Disposition::Retry);
        assert_eq!(
            AttemptFailure::Overloaded("o".into()).disposition(),
            Disposition::Terminal { trip_circuit: true }
        );
    }

    #[test]
    fn test_failure_maps_to_error_kind() {
        use tandem_common::ErrorKind;

        let cases = [
            (AttemptFailure::Timeout("t".into()), ErrorKind::Unavailable),
            (AttemptFailure::Connect("c".into()), ErrorKind::Unavailable),
            (AttemptFailure::Overloaded("o".into()), ErrorKind::Overloaded),
            (AttemptFailure::AuthRejected("a".into()), ErrorKind::AuthRejected),
            (
                AttemptFailure::RemoteStatus { status: 500, body: "x".into() },
                ErrorKind::RemoteInferenceFailed,
            ),
            (AttemptFailure::Protocol("p".into()), ErrorKind::RemoteInferenceFailed),
        ];

        for (failure, kind) in cases {
            assert_eq!(TandemError::from(failure).kind(), kind);
        }
    }

    #[test]
    fn test_sse_parser_handles_split_lines() {
        let mut parser = SseParser::default();

        let first = parser.feed(b"data: {\"token\":\"fn\",\"total_");
        assert!(first.is_empty());

        let second = parser.feed(b"tokens\":1}\r\n\n: keep-alive\ndata: {\"done\":true,\"total_tokens\":1,\"inference_time\":0.5}\n\n");
        assert_eq!(second.len(), 2);
        assert_eq!(
            second[0],
            StreamEvent::Token { token: "fn".into(), total_tokens: 1 }
        );
        assert!(second[1].is_terminal());
    }

    #[test]
    fn test_sse_parser_reads_error_events() {
        let mut parser = SseParser::default();

        let events = parser.feed(b"data: {\"error\":\"model_not_found\",\"done\":true}\n");

        assert_eq!(events, vec![StreamEvent::error("model_not_found", None)]);
    }

    #[test]
    fn test_sse_parser_keeps_multibyte_characters_split_across_reads() {
        let mut parser = SseParser::default();
        let line = "data: {\"token\":\"caf\u{e9}\",\"total_tokens\":1}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        assert!(parser.feed(&line[..split]).is_empty());
        let events = parser.feed(&line[split..]);

        assert_eq!(
            events,
            vec![StreamEvent::Token { token: "caf\u{e9}".into(), total_tokens: 1 }]
        );
    }
}
