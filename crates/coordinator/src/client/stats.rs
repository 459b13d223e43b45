//! Running statistics of the remote client

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic counters; writers never block and readers see best-effort values
#[derive(Debug, Default)]
pub struct ClientStats {
    requests_sent: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    inference_micros: AtomicU64,
    retries: AtomicU64,
    circuit_rejections: AtomicU64,
}

impl ClientStats {
    pub fn record_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        self.inference_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let sent = self.requests_sent.load(Ordering::Relaxed);
        let succeeded = self.requests_succeeded.load(Ordering::Relaxed);
        let total_secs = self.inference_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;

        let success_rate = if sent > 0 {
            succeeded as f64 / sent as f64 * 100.0
        } else {
            0.0
        };
        let average = if succeeded > 0 {
            total_secs / succeeded as f64
        } else {
            0.0
        };

        StatsSnapshot {
            requests_sent: sent,
            requests_succeeded: succeeded,
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            success_rate_percent: round_to(success_rate, 2),
            avg_inference_time_seconds: round_to(average, 3),
            total_inference_time_seconds: round_to(total_secs, 2),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Point-in-time view of [`ClientStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub requests_sent: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub retries: u64,
    pub circuit_rejections: u64,
    pub success_rate_percent: f64,
    pub avg_inference_time_seconds: f64,
    pub total_inference_time_seconds: f64,
}
