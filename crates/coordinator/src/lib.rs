//! Tandem Coordinator
//!
//! Front node: sheds load, compresses oversized prompts and forwards work to
//! the worker through a resilient client.

pub mod admission;
pub mod client;
pub mod compression;
pub mod server;

pub use admission::{AdmissionGate, AdmissionPermit};
pub use client::{ClientSettings, ResilientClient};
pub use compression::compress_prompt;
pub use server::{build_router, AppState, SharedState};
