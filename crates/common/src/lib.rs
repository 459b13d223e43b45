//! Tandem common library
//!
//! This crate contains shared code used by the coordinator and the worker.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::TandemConfig;
pub use error::{ErrorKind, Result, TandemError};
pub use metrics::MetricsRegistry;
