//! The analysis scheduler (§4.F) — the hardest subsystem in the pipeline.
//!
//! Accepts `(ErrorRecord, context)` pairs, makes an atomic admission decision
//! (memory-pressure-aware queue limit, then an absolute hard cap, then a
//! Critical-pressure size check), consults the shared advice cache, and runs
//! admitted tasks through a bounded pool of concurrent workers that call out
//! to a [`Provider`](triage_provider::Provider).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use triage_cache::TtlLruCache;
//! use triage_core::ErrorRecord;
//! use triage_memory::Monitor;
//! use triage_provider::Provider;
//! use triage_scheduler::{Scheduler, SchedulerConfig, ScheduleOutcome};
//!
//! # struct NullProvider;
//! # #[async_trait::async_trait]
//! # impl Provider for NullProvider {
//! #     async fn analyze(&self, _prompt: &str) -> Option<triage_core::Advice> { None }
//! #     fn name(&self) -> &str { "null" }
//! # }
//! # async fn example() {
//! let monitor = Monitor::new();
//! let cache = TtlLruCache::new("advice", 1000, Some(std::time::Duration::from_secs(300)));
//! let config = SchedulerConfig::builder().concurrency(5).queue_limit(100).build();
//! let scheduler = Scheduler::new(config, monitor, cache, Arc::new(NullProvider));
//!
//! let record = ErrorRecord::new("TypeError", "boom", "a.rs:1", "{}");
//! match scheduler.schedule(record, "{}".to_string()) {
//!     ScheduleOutcome::Admitted(handle) => {
//!         let _advice = handle.wait().await;
//!     }
//!     ScheduleOutcome::CacheHit(_advice) => {}
//!     ScheduleOutcome::Rejected(reason) => eprintln!("rejected: {reason}"),
//! }
//! # }
//! ```

pub mod cache_slot;
pub mod config;
pub mod error;
pub mod events;

pub use cache_slot::CacheSlot;
pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use error::RejectReason;
pub use events::SchedulerEvent;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, watch, Semaphore};
use tokio::task::JoinHandle;

use triage_cache::TtlLruCache;
use triage_core::events::EventListeners;
use triage_core::{Advice, ErrorRecord, ErrorSignature, Fingerprint, PressureLevel, QueueTask};
use triage_memory::Monitor;
use triage_provider::{analysis_prompt, Provider};

use cache_slot::staged_key;
use config::TOO_LARGE_BYTES;

#[cfg(feature = "metrics")]
use metrics::gauge;

/// The cache type shared between advice memoization and error staging (§3, §4.F).
pub type AdviceCache = TtlLruCache<String, CacheSlot>;

/// Outcome of [`Scheduler::schedule`] — mirrors the spec's
/// `Schedule(err, ctx) → future(advice) | Rejected{reason}` contract, with a
/// third variant for the cache-hit fast path that never touches the queue.
pub enum ScheduleOutcome {
    /// The cache already held advice for this fingerprint (§4.F step 9).
    CacheHit(Advice),
    /// Admitted; resolves once the worker completes or the task's deadline passes.
    Admitted(AnalysisHandle),
    /// Declined at admission.
    Rejected(RejectReason),
}

/// A handle to an admitted, in-flight analysis task.
pub struct AnalysisHandle {
    rx: oneshot::Receiver<Option<Advice>>,
}

impl AnalysisHandle {
    /// Awaits the task's outcome. Resolves to `None` on provider failure,
    /// parse failure, deadline expiry, or shutdown — the caller never sees a
    /// distinction, matching §4.F's best-effort failure semantics.
    pub async fn wait(self) -> Option<Advice> {
        self.rx.await.unwrap_or(None)
    }
}

/// Bounded queue + concurrency limiter + admission control (§4.F).
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    monitor: Monitor,
    cache: AdviceCache,
    provider: Arc<dyn Provider>,
    semaphore: Arc<Semaphore>,
    active: AtomicUsize,
    pending: AtomicUsize,
    rejects: AtomicUsize,
    admission_lock: Mutex<()>,
    metrics_handle: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    event_listeners: EventListeners<SchedulerEvent>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        monitor: Monitor,
        cache: AdviceCache,
        provider: Arc<dyn Provider>,
    ) -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        let semaphore = Arc::new(Semaphore::new(config.concurrency()));
        Self {
            inner: Arc::new(Inner {
                config,
                monitor,
                cache,
                provider,
                semaphore,
                active: AtomicUsize::new(0),
                pending: AtomicUsize::new(0),
                rejects: AtomicUsize::new(0),
                admission_lock: Mutex::new(()),
                metrics_handle: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
                shutdown_tx,
                event_listeners: EventListeners::new(),
            }),
        }
    }

    pub fn with_event_listener<L>(mut self, listener: L) -> Self
    where
        L: triage_core::events::EventListener<SchedulerEvent> + 'static,
    {
        Arc::get_mut(&mut self.inner)
            .expect("event listeners must be registered before the scheduler is shared")
            .event_listeners
            .add(listener);
        self
    }

    /// Current `active + pending`.
    pub fn queue_length(&self) -> usize {
        self.inner.active.load(Ordering::Acquire) + self.inner.pending.load(Ordering::Acquire)
    }

    pub fn reject_count(&self) -> usize {
        self.inner.rejects.load(Ordering::Acquire)
    }

    /// Admission algorithm (§4.F, steps 1-11). Serialized under a single
    /// mutex so reject accounting, size checks, and the active/pending
    /// counters stay consistent (§5 ordering guarantees).
    pub fn schedule(&self, record: ErrorRecord, context: String) -> ScheduleOutcome {
        let _guard = self.inner.admission_lock.lock().unwrap();

        if self.inner.shutting_down.load(Ordering::Acquire) {
            self.inner.rejects.fetch_add(1, Ordering::Relaxed);
            return ScheduleOutcome::Rejected(RejectReason::Shutdown);
        }

        let fingerprint = record.fingerprint();
        let signature = ErrorSignature::from_record(&record);
        let signature_id = fingerprint.signature_id().to_string();

        // Step 2: best-effort staging of the full record/context.
        self.inner.cache.set(
            staged_key(&signature_id),
            CacheSlot::Staged {
                record: record.clone(),
                context: context.clone(),
                staged_at: Instant::now(),
            },
        );
        if self.inner.cache.is_disabled() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                scheduler = %self.inner.config.name,
                "cache unavailable; degrading error staging to no-cache behavior"
            );
        }

        let active = self.inner.active.load(Ordering::Acquire);
        let pending = self.inner.pending.load(Ordering::Acquire);
        let total = active + pending;
        let pressure = self.inner.monitor.current();
        let dyn_limit = Self::dyn_limit(self.inner.config.queue_limit(), pressure);

        if total >= dyn_limit {
            self.inner.rejects.fetch_add(1, Ordering::Relaxed);
            self.emit(SchedulerEvent::TaskRejected {
                pattern_name: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                reason: RejectReason::QueueFull,
                pressure,
                dyn_limit,
                active,
                pending,
            });
            #[cfg(feature = "tracing")]
            tracing::warn!(
                pressure = ?pressure,
                limit = dyn_limit,
                active,
                pending,
                "analysis scheduler queue full"
            );
            return ScheduleOutcome::Rejected(RejectReason::QueueFull);
        }

        // Checked after the pressure-derived limit, matching the spec's own
        // step ordering (§9 open question on ABSOLUTE_MAX vs. dynLimit order).
        if total >= self.inner.config.absolute_max() {
            self.inner.rejects.fetch_add(1, Ordering::Relaxed);
            self.emit(SchedulerEvent::TaskRejected {
                pattern_name: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                reason: RejectReason::AbsoluteMax,
                pressure,
                dyn_limit,
                active,
                pending,
            });
            #[cfg(feature = "tracing")]
            tracing::error!(active, pending, "analysis scheduler absolute max reached");
            return ScheduleOutcome::Rejected(RejectReason::AbsoluteMax);
        }

        if pressure == PressureLevel::Critical && signature.estimated_size() > TOO_LARGE_BYTES {
            self.inner.rejects.fetch_add(1, Ordering::Relaxed);
            self.emit(SchedulerEvent::TaskRejected {
                pattern_name: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                reason: RejectReason::TooLarge,
                pressure,
                dyn_limit,
                active,
                pending,
            });
            return ScheduleOutcome::Rejected(RejectReason::TooLarge);
        }

        // Step 9: a cache hit short-circuits the provider, consuming no queue slot.
        if let Some(CacheSlot::Advice(advice)) = self.inner.cache.get(&fingerprint.as_str().to_string()) {
            self.emit(SchedulerEvent::CacheHit {
                pattern_name: self.inner.config.name.clone(),
                timestamp: Instant::now(),
            });
            return ScheduleOutcome::CacheHit(advice);
        }

        if total == 0 {
            self.start_metrics();
        }

        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        self.emit(SchedulerEvent::TaskAdmitted {
            pattern_name: self.inner.config.name.clone(),
            timestamp: Instant::now(),
            active,
            pending: pending + 1,
        });

        let (tx, rx) = oneshot::channel();
        let task = QueueTask {
            fingerprint,
            signature,
            enqueued_at: Instant::now(),
        };
        let inner = Arc::clone(&self.inner);
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(run_task(inner, task, tx, shutdown_rx));

        ScheduleOutcome::Admitted(AnalysisHandle { rx })
    }

    /// `dynLimit = pressureLimits[pressure]` (§4.F step 5).
    fn dyn_limit(queue_limit: usize, pressure: PressureLevel) -> usize {
        ((queue_limit as f64) * pressure.queue_fraction()).floor() as usize
    }

    fn emit(&self, event: SchedulerEvent) {
        self.inner.event_listeners.emit(&event);
    }

    fn start_metrics(&self) {
        let Some(interval) = self.inner.config.metric_interval else {
            return;
        };
        let mut guard = self.inner.metrics_handle.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let active = inner.active.load(Ordering::Acquire);
                let pending = inner.pending.load(Ordering::Acquire);
                let pressure = inner.monitor.current();
                let dyn_limit = Scheduler::dyn_limit(inner.config.queue_limit(), pressure);
                let rejects = inner.rejects.load(Ordering::Acquire);
                let heap_used_mib = inner.monitor.stats().heap_used as f64 / (1024.0 * 1024.0);

                inner.event_listeners.emit(&SchedulerEvent::MetricsTick {
                    pattern_name: inner.config.name.clone(),
                    timestamp: Instant::now(),
                    queue_length: active + pending,
                    rejects,
                    pressure,
                    dyn_limit,
                });

                #[cfg(feature = "tracing")]
                tracing::info!(
                    queue_length = active + pending,
                    rejects,
                    pressure = ?pressure,
                    dyn_limit,
                    heap_used_mib,
                    "analysis scheduler metrics"
                );

                #[cfg(feature = "metrics")]
                {
                    gauge!("triage_scheduler_queue_length", "scheduler" => inner.config.name.clone())
                        .set((active + pending) as f64);
                    gauge!("triage_scheduler_rejects_total", "scheduler" => inner.config.name.clone())
                        .set(rejects as f64);
                }
            }
        }));
    }

    fn stop_metrics(&self) {
        if let Some(handle) = self.inner.metrics_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Transitions to a draining state: further `schedule` calls are
    /// rejected immediately; pending tasks are woken and resolved as
    /// `Rejected{Shutdown}`; in-flight tasks get up to `shutdown_grace` to
    /// finish naturally before this returns.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        let _ = self.inner.shutdown_tx.send(true);

        let deadline = Instant::now() + self.inner.config.shutdown_grace;
        while Instant::now() < deadline {
            if self.inner.active.load(Ordering::Acquire) == 0
                && self.inner.pending.load(Ordering::Acquire) == 0
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.stop_metrics();
    }

    fn maybe_stop_metrics(&self) {
        if self.inner.active.load(Ordering::Acquire) == 0
            && self.inner.pending.load(Ordering::Acquire) == 0
        {
            self.stop_metrics();
        }
    }
}

/// Runs one admitted task: waits for a worker slot (or the task's deadline,
/// or shutdown, whichever first), fetches the staged error from the cache
/// (falling back to a minimal reconstruction from the bounded signature if
/// it was evicted), calls the provider, and writes advice back to the cache.
async fn run_task(
    inner: Arc<Inner>,
    task: QueueTask,
    tx: oneshot::Sender<Option<Advice>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let deadline = task.enqueued_at + inner.config.max_task_age;
    let remaining = deadline.saturating_duration_since(Instant::now());

    let acquire = inner.semaphore.clone().acquire_owned();
    let permit = tokio::select! {
        p = acquire => p.ok(),
        _ = tokio::time::sleep(remaining) => None,
        _ = wait_for_shutdown(&mut shutdown_rx) => None,
    };

    let Some(_permit) = permit else {
        inner.pending.fetch_sub(1, Ordering::AcqRel);
        let _ = tx.send(None);
        let scheduler = Scheduler { inner: Arc::clone(&inner) };
        scheduler.maybe_stop_metrics();
        return;
    };

    inner.pending.fetch_sub(1, Ordering::AcqRel);
    inner.active.fetch_add(1, Ordering::AcqRel);
    let started = Instant::now();

    let staged = inner.cache.get(&staged_key(task.fingerprint.signature_id()));
    let (record, context) = match staged {
        Some(CacheSlot::Staged { record, context, .. }) => (record, context),
        _ => (reconstruct_minimal(&task.signature), String::new()),
    };

    let prompt = analysis_prompt(&record.error_name, &record.message, &record.stack_trace, &context);
    let remaining = deadline.saturating_duration_since(Instant::now());
    let advice = tokio::time::timeout(remaining, inner.provider.analyze(&prompt))
        .await
        .ok()
        .flatten();

    if let Some(ref advice) = advice {
        inner
            .cache
            .set(task.fingerprint.as_str().to_string(), CacheSlot::Advice(advice.clone()));
    }

    let produced_advice = advice.is_some();
    let _ = tx.send(advice);
    inner.active.fetch_sub(1, Ordering::AcqRel);

    inner.event_listeners.emit(&SchedulerEvent::TaskCompleted {
        pattern_name: inner.config.name.clone(),
        timestamp: Instant::now(),
        duration: started.elapsed(),
        produced_advice,
    });

    let scheduler = Scheduler { inner };
    scheduler.maybe_stop_metrics();
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Minimal `ErrorRecord` reconstructed from the bounded `ErrorSignature`
/// carried by the queue task, when the staged full record was evicted from
/// the cache before the worker ran (§4.F "Task execution").
fn reconstruct_minimal(signature: &ErrorSignature) -> ErrorRecord {
    ErrorRecord::new(signature.name.clone(), signature.message.clone(), "", "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use triage_memory::{MemorySample, MemorySampler, SampleError};

    struct FixedPressureSampler;
    impl MemorySampler for FixedPressureSampler {
        fn sample(&self) -> Result<MemorySample, SampleError> {
            Ok(MemorySample {
                heap_used: 0,
                heap_total: 100,
                system_free: 100,
                system_total: 100,
                timestamp: Instant::now(),
            })
        }
    }

    struct CountingProvider {
        calls: Arc<StdAtomicUsize>,
    }

    #[async_trait]
    impl Provider for CountingProvider {
        async fn analyze(&self, _prompt: &str) -> Option<Advice> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(Advice::Raw("fix it".to_string()))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn scheduler_with(concurrency: usize, queue_limit: usize, calls: Arc<StdAtomicUsize>) -> Scheduler {
        let monitor = Monitor::with_sampler(Box::new(FixedPressureSampler));
        let cache = AdviceCache::new("advice", 100, None);
        let config = SchedulerConfig::builder()
            .concurrency(concurrency)
            .queue_limit(queue_limit)
            .build();
        Scheduler::new(config, monitor, cache, Arc::new(CountingProvider { calls }))
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_provider() {
        let calls = Arc::new(StdAtomicUsize::new(0));
        let scheduler = scheduler_with(5, 10, calls.clone());

        let record = ErrorRecord::new("TypeError", "boom", "a.rs:1\nb.rs:2", "{}");
        match scheduler.schedule(record.clone(), "{}".to_string()) {
            ScheduleOutcome::Admitted(handle) => {
                let advice = handle.wait().await;
                assert!(advice.is_some());
            }
            _ => panic!("expected admission on first call"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        match scheduler.schedule(record, "{}".to_string()) {
            ScheduleOutcome::CacheHit(advice) => {
                assert_eq!(advice, Advice::Raw("fix it".to_string()));
            }
            _ => panic!("expected a cache hit on the second identical error"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "provider must not be called twice");
    }

    #[tokio::test]
    async fn absolute_max_rejects_when_queue_limit_is_looser() {
        let calls = Arc::new(StdAtomicUsize::new(0));
        let monitor = Monitor::with_sampler(Box::new(FixedPressureSampler));
        let cache = AdviceCache::new("advice", 100, None);
        let config = SchedulerConfig::builder()
            .concurrency(1)
            .queue_limit(1000)
            .absolute_max(1)
            .build();
        let scheduler = Scheduler::new(config, monitor, cache, Arc::new(CountingProvider { calls }));

        let first = ErrorRecord::new("E1", "m1", "s1", "{}");
        let _handle = match scheduler.schedule(first, "{}".to_string()) {
            ScheduleOutcome::Admitted(handle) => handle,
            _ => panic!("expected first task admitted"),
        };

        let second = ErrorRecord::new("E2", "m2", "s2", "{}");
        match scheduler.schedule(second, "{}".to_string()) {
            ScheduleOutcome::Rejected(RejectReason::AbsoluteMax) => {}
            _ => panic!("expected AbsoluteMax rejection"),
        }
        assert_eq!(scheduler.reject_count(), 1);
    }

    #[tokio::test]
    async fn distinct_errors_each_invoke_the_provider() {
        let calls = Arc::new(StdAtomicUsize::new(0));
        let scheduler = scheduler_with(5, 10, calls.clone());

        for i in 0..3 {
            let record = ErrorRecord::new(format!("E{i}"), format!("m{i}"), format!("s{i}"), "{}");
            if let ScheduleOutcome::Admitted(handle) = scheduler.schedule(record, "{}".to_string()) {
                handle.wait().await;
            } else {
                panic!("expected admission");
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shutdown_rejects_subsequent_schedules() {
        let calls = Arc::new(StdAtomicUsize::new(0));
        let scheduler = scheduler_with(5, 10, calls);
        scheduler.shutdown().await;

        let record = ErrorRecord::new("E", "m", "s", "{}");
        match scheduler.schedule(record, "{}".to_string()) {
            ScheduleOutcome::Rejected(RejectReason::Shutdown) => {}
            _ => panic!("expected Shutdown rejection after shutdown()"),
        }
    }
}
