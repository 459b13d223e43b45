//! Concurrency-based admission control
//!
//! Requests beyond `max_inflight` are shed immediately instead of queueing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tandem_common::{Result, TandemError};

/// In-flight request counter with a hard ceiling
#[derive(Debug)]
pub struct AdmissionGate {
    inflight: AtomicUsize,
    max_inflight: usize,
}

impl AdmissionGate {
    pub fn new(max_inflight: usize) -> Arc<Self> {
        Arc::new(Self {
            inflight: AtomicUsize::new(0),
            max_inflight,
        })
    }

    /// Admit one request or reject with `Overloaded`
    ///
    /// The returned permit releases its slot when dropped, on every exit path.
    pub fn enter(self: &Arc<Self>) -> Result<AdmissionPermit> {
        let mut current = self.inflight.load(Ordering::Acquire);
        loop {
            if current >= self.max_inflight {
                return Err(TandemError::overloaded(format!(
                    "{} requests in flight (max {}), retry later",
                    current, self.max_inflight
                )));
            }
            match self.inflight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(AdmissionPermit {
                        gate: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn max_inflight(&self) -> usize {
        self.max_inflight
    }
}

/// Slot held by an admitted request
#[derive(Debug)]
pub struct AdmissionPermit {
    gate: Arc<AdmissionGate>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.inflight.fetch_sub(1, Ordering::AcqRel);
    }
}
