//! Tandem worker library
//!
//! This crate implements the back node: capacity gating, the model cache and
//! the inference API consumed by the coordinator.

pub mod capacity;
pub mod engine;
pub mod model_cache;
pub mod server;

pub use capacity::{CapacityGate, ResourceMonitor, ResourceReading, SysinfoMonitor};
pub use engine::{engine_for, InferenceEngine, LoadedModel, MappedEchoEngine};
pub use model_cache::ModelCache;
pub use server::{build_router, AppState, SharedState};
