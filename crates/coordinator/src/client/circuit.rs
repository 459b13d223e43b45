//! Failure-triggered cooldown for remote calls

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker with a single failure timestamp
///
/// While less than `cooldown` has elapsed since the last recorded failure the
/// circuit is open and calls fail fast.
#[derive(Debug)]
pub struct CircuitBreaker {
    last_failure: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_failure: Mutex::new(None),
            cooldown,
        }
    }

    /// Time left until the circuit closes, `None` when closed
    pub fn remaining(&self) -> Option<Duration> {
        let last = (*self.last_failure.lock())?;
        self.cooldown.checked_sub(last.elapsed()).filter(|d| !d.is_zero())
    }

    pub fn is_open(&self) -> bool {
        self.remaining().is_some()
    }

    /// Stamp a failure now, opening the circuit for a full cooldown
    pub fn trip(&self) {
        *self.last_failure.lock() = Some(Instant::now());
    }

    pub fn last_failure(&self) -> Option<Instant> {
        *self.last_failure.lock()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_for_cooldown() {
        let circuit = CircuitBreaker::new(Duration::from_secs(30));
        assert!(!circuit.is_open());
        assert!(circuit.last_failure().is_none());

        circuit.trip();
        assert!(circuit.is_open());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(circuit.remaining(), Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!circuit.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_restarts_cooldown() {
        let circuit = CircuitBreaker::new(Duration::from_secs(10));

        circuit.trip();
        tokio::time::advance(Duration::from_secs(8)).await;
        circuit.trip();
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(circuit.is_open());
    }
}
