//! Memory-pressure monitor driving adaptive backpressure across the pipeline.
//!
//! Samples heap and system memory at an interval that shrinks as pressure
//! rises, classifies the result into a [`PressureLevel`], and notifies
//! subscribers on every level change. Sampling failures never propagate:
//! the monitor pins pressure at its last known value.

mod sampler;

pub use sampler::{MemorySample, MemorySampler, SampleError, SysinfoSampler};
pub use triage_core::PressureLevel;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[cfg(feature = "metrics")]
use metrics::gauge;

/// A handle to the running memory monitor.
///
/// Cloning shares the same underlying sampler loop; dropping every handle
/// does not stop the loop — call [`Monitor::stop`] explicitly, or hold the
/// returned [`JoinHandle`] only as long as needed and abort it.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

struct Inner {
    pressure_atomic: AtomicU8,
    latest: Mutex<MemorySample>,
    tx: watch::Sender<PressureLevel>,
    sampler: Box<dyn MemorySampler>,
    last_gc_hint: Mutex<Option<Instant>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// A subscription to pressure-level change notifications.
///
/// Backed by a [`tokio::sync::watch`] channel: subscribers only ever observe
/// the latest level, never a backlog of every transition.
pub struct Subscription(watch::Receiver<PressureLevel>);

impl Subscription {
    /// Waits for the next pressure-level change and returns the new level.
    pub async fn changed(&mut self) -> PressureLevel {
        let _ = self.0.changed().await;
        *self.0.borrow()
    }

    /// Returns the current level without waiting.
    pub fn current(&self) -> PressureLevel {
        *self.0.borrow()
    }
}

impl Monitor {
    /// Builds a monitor using a real `sysinfo`-backed sampler.
    pub fn new() -> Self {
        Self::with_sampler(Box::new(SysinfoSampler::new()))
    }

    /// Builds a monitor over an injectable sampler — used by tests to drive
    /// specific pressure transitions without depending on actual host memory.
    pub fn with_sampler(sampler: Box<dyn MemorySampler>) -> Self {
        let initial = PressureLevel::default();
        let (tx, _rx) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                pressure_atomic: AtomicU8::new(level_to_u8(initial)),
                latest: Mutex::new(MemorySample::empty()),
                tx,
                sampler,
                last_gc_hint: Mutex::new(None),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Starts the adaptive sampling loop. No-op if already started.
    pub fn start(&self) {
        let mut handle_guard = self.inner.handle.lock().unwrap();
        if handle_guard.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *handle_guard = Some(tokio::spawn(async move {
            loop {
                let level = sample_once(&inner);
                let interval = level.sampling_interval();
                tokio::time::sleep(interval).await;
                let _ = level;
            }
        }));
    }

    /// Stops the sampling loop; safe to call more than once.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Returns the last observed pressure level.
    ///
    /// Pinned to the live last sample rather than a rolling history average
    /// (§9 design note: implementers should pick one and document it).
    pub fn current(&self) -> PressureLevel {
        u8_to_level(self.inner.pressure_atomic.load(Ordering::Acquire))
    }

    /// Subscribes to pressure-level change notifications.
    pub fn subscribe(&self) -> Subscription {
        Subscription(self.inner.tx.subscribe())
    }

    /// Returns the most recent raw memory sample.
    pub fn stats(&self) -> MemorySample {
        self.inner.latest.lock().unwrap().clone()
    }

    /// Forces an immediate sample outside of the adaptive loop; useful in
    /// tests and for an initial synchronous reading at startup.
    pub fn sample_now(&self) -> PressureLevel {
        sample_once(&self.inner)
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_once(inner: &Inner) -> PressureLevel {
    let level = match inner.sampler.sample() {
        Ok(sample) => {
            let level = classify(&sample);
            *inner.latest.lock().unwrap() = sample;
            level
        }
        Err(_) => {
            // Sampling failed; never propagate, keep the last known level.
            u8_to_level(inner.pressure_atomic.load(Ordering::Acquire))
        }
    };

    let previous = inner.pressure_atomic.swap(level_to_u8(level), Ordering::AcqRel);
    if previous != level_to_u8(level) {
        let _ = inner.tx.send(level);

        #[cfg(feature = "tracing")]
        tracing::info!(from = ?u8_to_level(previous), to = ?level, "memory pressure changed");

        #[cfg(feature = "metrics")]
        gauge!("triage_memory_pressure_level").set(level_to_u8(level) as f64);

        if level == PressureLevel::Critical {
            maybe_gc_hint(inner);
        }
    }

    level
}

fn classify(sample: &MemorySample) -> PressureLevel {
    let heap_ratio = if sample.heap_total > 0 {
        sample.heap_used as f64 / sample.heap_total as f64
    } else {
        0.0
    };
    let system_ratio = if sample.system_total > 0 {
        (sample.system_total - sample.system_free) as f64 / sample.system_total as f64
    } else {
        0.0
    };
    PressureLevel::classify(heap_ratio.max(system_ratio))
}

/// Emits at most one GC hint per 30s on Critical transitions. A real GC hint
/// is environment-specific (there is no language runtime GC to nudge here);
/// this records the occasion so a host integration can act on it via
/// [`Monitor::subscribe`].
fn maybe_gc_hint(inner: &Inner) {
    let mut last = inner.last_gc_hint.lock().unwrap();
    let now = Instant::now();
    let should_hint = match *last {
        Some(prev) => now.duration_since(prev) >= Duration::from_secs(30),
        None => true,
    };
    if should_hint {
        *last = Some(now);
        #[cfg(feature = "tracing")]
        tracing::warn!("memory pressure critical, gc hint issued");
    }
}

fn level_to_u8(level: PressureLevel) -> u8 {
    match level {
        PressureLevel::Low => 0,
        PressureLevel::Medium => 1,
        PressureLevel::High => 2,
        PressureLevel::Critical => 3,
    }
}

fn u8_to_level(value: u8) -> PressureLevel {
    match value {
        0 => PressureLevel::Low,
        1 => PressureLevel::Medium,
        2 => PressureLevel::High,
        _ => PressureLevel::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sampler::FakeSampler;

    #[test]
    fn classifies_from_fake_sample() {
        let sampler = FakeSampler::new(MemorySample {
            heap_used: 900,
            heap_total: 1000,
            system_free: 100,
            system_total: 1000,
            timestamp: Instant::now(),
        });
        let monitor = Monitor::with_sampler(Box::new(sampler));
        assert_eq!(monitor.sample_now(), PressureLevel::Critical);
        assert_eq!(monitor.current(), PressureLevel::Critical);
    }

    #[test]
    fn sampling_failure_keeps_last_known_level() {
        let sampler = FakeSampler::new(MemorySample {
            heap_used: 100,
            heap_total: 1000,
            system_free: 900,
            system_total: 1000,
            timestamp: Instant::now(),
        });
        sampler.fail_next();
        let monitor = Monitor::with_sampler(Box::new(sampler));
        // default pressure is Medium until first successful sample
        assert_eq!(monitor.sample_now(), PressureLevel::Medium);
    }

    #[tokio::test]
    async fn subscribers_observe_level_changes() {
        let sampler = FakeSampler::new(MemorySample {
            heap_used: 100,
            heap_total: 1000,
            system_free: 900,
            system_total: 1000,
            timestamp: Instant::now(),
        });
        let monitor = Monitor::with_sampler(Box::new(sampler.clone()));
        let mut sub = monitor.subscribe();

        sampler.set(MemorySample {
            heap_used: 900,
            heap_total: 1000,
            system_free: 100,
            system_total: 1000,
            timestamp: Instant::now(),
        });
        monitor.sample_now();

        let level = tokio::time::timeout(Duration::from_secs(1), sub.changed())
            .await
            .expect("notification");
        assert_eq!(level, PressureLevel::Critical);
    }
}
