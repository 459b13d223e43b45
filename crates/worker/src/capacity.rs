//! Resource sampling and the capacity gate
//!
//! The gate samples CPU and memory per request and rejects work when the host
//! is saturated. Nothing is reserved for accepted work, so two requests may
//! pass together and then compete for the same resources.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};
use tandem_common::config::WorkerConfig;
use tandem_common::{Result, TandemError};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One sample of host resources
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceReading {
    pub cpu_percent: f32,
    pub available_memory_bytes: u64,
    pub used_memory_bytes: u64,
}

impl ResourceReading {
    pub fn available_gb(&self) -> f64 {
        self.available_memory_bytes as f64 / GIB
    }

    pub fn used_gb(&self) -> f64 {
        self.used_memory_bytes as f64 / GIB
    }
}

/// Source of CPU and memory readings
pub trait ResourceMonitor: Send + Sync {
    fn sample(&self) -> ResourceReading;
}

/// Host monitor backed by `sysinfo`
///
/// CPU usage is measured over the interval since the previous refresh and is
/// meaningless when refreshed faster than sysinfo's minimum update interval.
/// Samples inside that interval reuse the last CPU reading; memory is read
/// every time. The first reading after start may be zero.
pub struct SysinfoMonitor {
    state: Mutex<SamplerState>,
    cpu_interval: Duration,
}

struct SamplerState {
    system: System,
    cpu_percent: f32,
    cpu_sampled_at: Instant,
}

impl SysinfoMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            state: Mutex::new(SamplerState {
                system,
                cpu_percent: 0.0,
                cpu_sampled_at: Instant::now(),
            }),
            cpu_interval: MINIMUM_CPU_UPDATE_INTERVAL,
        }
    }

    /// Refresh CPU usage at most once per `interval`, never faster than sysinfo allows
    pub fn with_cpu_interval(mut self, interval: Duration) -> Self {
        self.cpu_interval = interval.max(MINIMUM_CPU_UPDATE_INTERVAL);
        self
    }
}

impl Default for SysinfoMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for SysinfoMonitor {
    fn sample(&self) -> ResourceReading {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.cpu_sampled_at.elapsed() >= self.cpu_interval {
            state.system.refresh_cpu();
            let cpus = state.system.cpus();
            state.cpu_percent = if cpus.is_empty() {
                0.0
            } else {
                cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
            };
            state.cpu_sampled_at = Instant::now();
        }
        state.system.refresh_memory();

        ResourceReading {
            cpu_percent: state.cpu_percent,
            available_memory_bytes: state.system.available_memory(),
            used_memory_bytes: state.system.used_memory(),
        }
    }
}

/// Stateless admission check against host resources
#[derive(Debug, Clone, Copy)]
pub struct CapacityGate {
    max_cpu_percent: f32,
    min_available_memory_bytes: u64,
}

impl CapacityGate {
    pub fn new(max_cpu_percent: f32, min_available_memory_bytes: u64) -> Self {
        Self {
            max_cpu_percent,
            min_available_memory_bytes,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.max_cpu_percent, config.min_available_memory_bytes)
    }

    /// Accept or reject based on a reading
    pub fn check_reading(&self, reading: &ResourceReading) -> Result<()> {
        if reading.cpu_percent > self.max_cpu_percent {
            return Err(TandemError::overloaded(format!(
                "CPU usage too high: {:.1}%",
                reading.cpu_percent
            )));
        }
        if reading.available_memory_bytes < self.min_available_memory_bytes {
            return Err(TandemError::overloaded(format!(
                "Insufficient RAM: {:.2}GB available",
                reading.available_gb()
            )));
        }
        Ok(())
    }

    /// Sample `monitor` and check the reading
    pub fn check(&self, monitor: &dyn ResourceMonitor) -> Result<ResourceReading> {
        let reading = monitor.sample();
        self.check_reading(&reading)?;
        Ok(reading)
    }
}
