//! Common error types for Tandem
//!
//! This module defines the error taxonomy shared by the coordinator and the worker.
//! Every error carries a kind and a human-readable reason, and maps to an HTTP status.

use thiserror::Error;

/// Main error type for Tandem
#[derive(Error, Debug)]
pub enum TandemError {
    /// Admission or capacity gate rejection; the caller should back off
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// Circuit open, connection failure or timeout
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Remote rejected our credentials; a configuration error, never retried
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Remote answered with a non-success, non-overload status
    #[error("Remote inference failed: {0}")]
    RemoteInferenceFailed(String),

    /// Prompt exceeds the boundary size cap
    #[error("Prompt too large: {0}")]
    PromptTooLarge(String),

    /// Unknown model identifier or missing model file
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error kind tag, stable across releases and used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Overloaded,
    Unavailable,
    AuthRejected,
    RemoteInferenceFailed,
    PromptTooLarge,
    NotFound,
    InvalidInput,
    Config,
    Internal,
}

impl ErrorKind {
    /// Snake-case name rendered in error bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::AuthRejected => "auth_rejected",
            ErrorKind::RemoteInferenceFailed => "remote_inference_failed",
            ErrorKind::PromptTooLarge => "prompt_too_large",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TandemError {
    /// Kind tag of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TandemError::Overloaded(_) => ErrorKind::Overloaded,
            TandemError::Unavailable(_) => ErrorKind::Unavailable,
            TandemError::AuthRejected(_) => ErrorKind::AuthRejected,
            TandemError::RemoteInferenceFailed(_) => ErrorKind::RemoteInferenceFailed,
            TandemError::PromptTooLarge(_) => ErrorKind::PromptTooLarge,
            TandemError::NotFound(_) => ErrorKind::NotFound,
            TandemError::InvalidInput(_) | TandemError::Serialization(_) => {
                ErrorKind::InvalidInput
            }
            TandemError::Config(_) => ErrorKind::Config,
            TandemError::Io(_) | TandemError::Metrics(_) | TandemError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Human-readable reason without the kind prefix
    pub fn reason(&self) -> String {
        match self {
            TandemError::Overloaded(msg)
            | TandemError::Unavailable(msg)
            | TandemError::AuthRejected(msg)
            | TandemError::RemoteInferenceFailed(msg)
            | TandemError::PromptTooLarge(msg)
            | TandemError::NotFound(msg)
            | TandemError::InvalidInput(msg)
            | TandemError::Config(msg)
            | TandemError::Internal(msg) => msg.clone(),
            TandemError::Serialization(err) => err.to_string(),
            TandemError::Io(err) => err.to_string(),
            TandemError::Metrics(err) => err.to_string(),
        }
    }

    /// Convert error to an HTTP status code
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Overloaded | ErrorKind::Unavailable => 503,
            ErrorKind::AuthRejected | ErrorKind::RemoteInferenceFailed => 502,
            ErrorKind::PromptTooLarge => 413,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidInput => 422,
            ErrorKind::Config | ErrorKind::Internal => 500,
        }
    }

    /// Create an overloaded error
    pub fn overloaded(msg: impl Into<String>) -> Self {
        TandemError::Overloaded(msg.into())
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        TandemError::Unavailable(msg.into())
    }

    /// Create an auth rejected error
    pub fn auth_rejected(msg: impl Into<String>) -> Self {
        TandemError::AuthRejected(msg.into())
    }

    /// Create a remote inference error
    pub fn remote_inference(msg: impl Into<String>) -> Self {
        TandemError::RemoteInferenceFailed(msg.into())
    }

    /// Create a prompt too large error
    pub fn prompt_too_large(msg: impl Into<String>) -> Self {
        TandemError::PromptTooLarge(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        TandemError::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        TandemError::InvalidInput(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        TandemError::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        TandemError::Internal(msg.into())
    }
}

/// Result type alias for Tandem operations
pub type Result<T> = std::result::Result<T, TandemError>;
