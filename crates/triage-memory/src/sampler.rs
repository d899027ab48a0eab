//! Pluggable memory sampling so the monitor's pressure logic can be tested
//! without depending on actual host memory state.

use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::System;

/// `{heapUsed, heapTotal, systemFree, systemTotal, timestamp}` — the raw
/// reading a sampler produces each tick.
#[derive(Debug, Clone)]
pub struct MemorySample {
    pub heap_used: u64,
    pub heap_total: u64,
    pub system_free: u64,
    pub system_total: u64,
    pub timestamp: Instant,
}

impl MemorySample {
    pub fn empty() -> Self {
        Self {
            heap_used: 0,
            heap_total: 0,
            system_free: 0,
            system_total: 0,
            timestamp: Instant::now(),
        }
    }
}

/// A source of memory samples. Implemented by [`SysinfoSampler`] in
/// production and by a fake in tests.
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> Result<MemorySample, SampleError>;
}

/// Sampling never surfaces beyond the monitor: callers fall back to the
/// last known pressure level. This type exists so the trait boundary is
/// explicit about what can go wrong.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("memory sample unavailable")]
pub struct SampleError;

/// Real sampler backed by `sysinfo`. The process's resident set size stands
/// in for "heap used/total" since Rust does not expose a managed heap size;
/// system-wide free/total memory is read directly from the OS.
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample(&self) -> Result<MemorySample, SampleError> {
        let mut system = self.system.lock().map_err(|_| SampleError)?;
        system.refresh_memory();

        let system_total = system.total_memory();
        let system_free = system.available_memory();

        let pid = sysinfo::get_current_pid().map_err(|_| SampleError)?;
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
        let process_rss = system
            .process(pid)
            .map(|p| p.memory())
            .ok_or(SampleError)?;

        Ok(MemorySample {
            heap_used: process_rss,
            heap_total: system_total,
            system_free,
            system_total,
            timestamp: Instant::now(),
        })
    }
}

/// An injectable sampler that returns a fixed sample (or fails once) on demand.
#[derive(Clone)]
pub struct FakeSampler {
    sample: Arc<Mutex<MemorySample>>,
    fail_once: Arc<Mutex<bool>>,
}

impl FakeSampler {
    pub fn new(sample: MemorySample) -> Self {
        Self {
            sample: Arc::new(Mutex::new(sample)),
            fail_once: Arc::new(Mutex::new(false)),
        }
    }

    pub fn set(&self, sample: MemorySample) {
        *self.sample.lock().unwrap() = sample;
    }

    pub fn fail_next(&self) {
        *self.fail_once.lock().unwrap() = true;
    }
}

impl MemorySampler for FakeSampler {
    fn sample(&self) -> Result<MemorySample, SampleError> {
        let mut fail = self.fail_once.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(SampleError);
        }
        Ok(self.sample.lock().unwrap().clone())
    }
}
