//! The error pipeline entry (§4.H): the seam every host integration calls
//! into. Assembles the memory monitor, advice cache, scheduler, rate
//! limiter, and provider registry from a [`crate::Config`], and implements
//! `Handle(err, ctx, req?, res?, next?)`'s strict six-step order.

use std::sync::Arc;

use triage_cache::TtlLruCache;
use triage_core::events::EventListener;
use triage_core::ErrorRecord;
use triage_memory::Monitor;
use triage_provider::ProviderRegistry;
use triage_ratelimiter::{RateLimiter, RateLimiterConfig};
use triage_scheduler::{CacheSlot, Scheduler, SchedulerConfig, ScheduleOutcome};
use triage_secrets::SecretsStore;

use crate::responder::{html_escape, Responder};
use crate::sanitize::{DefaultSanitizer, Sanitizer};
use crate::Config;

/// A raw error as handed to [`ErrorPipeline::handle`] — wrapped in `Option`
/// at the call site rather than on this struct, so "no error" (§4.H step 1)
/// is expressible without a sentinel field.
#[derive(Debug, Clone)]
pub struct RawError {
    pub error_name: String,
    pub message: String,
    pub stack_trace: String,
    pub status_code: u16,
    pub is_operational: bool,
    pub context: String,
}

impl RawError {
    pub fn new(error_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_name: error_name.into(),
            message: message.into(),
            stack_trace: String::new(),
            status_code: 500,
            is_operational: true,
            context: String::new(),
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = stack_trace.into();
        self
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// A structured log record matching §6's `{uniqueName, timestamp, message,
/// statusCode, isOperational, context, stack}` shape. Sanitization is the
/// log sink's job, applied to this record's JSON form before persistence —
/// the pipeline itself only ever logs the unredacted value through
/// `tracing`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogRecord {
    pub unique_name: String,
    pub timestamp: u128,
    pub message: String,
    pub status_code: u16,
    pub is_operational: bool,
    pub context: String,
    pub stack: String,
}

impl From<&ErrorRecord> for LogRecord {
    fn from(record: &ErrorRecord) -> Self {
        Self {
            unique_name: record.unique_name.clone(),
            timestamp: record.timestamp_ms,
            message: record.message.clone(),
            status_code: record.status_code,
            is_operational: record.is_operational,
            context: record.context.clone(),
            stack: record.stack_trace.clone(),
        }
    }
}

/// Assembles every subsystem and exposes the single `handle` entry point
/// (§4.H). Cloning is cheap and shares every underlying subsystem — clone
/// freely across request handlers.
#[derive(Clone)]
pub struct ErrorPipeline {
    monitor: Monitor,
    scheduler: Scheduler,
    rate_limiter: RateLimiter,
    secrets: Arc<SecretsStore>,
    sanitizer: Arc<dyn Sanitizer>,
}

impl ErrorPipeline {
    /// Wires the pipeline together: a shared advice cache between the
    /// scheduler's memoization and staging slots, a memory monitor whose
    /// pressure changes drive both the cache and the rate limiter's
    /// fallback eviction, and the supplied provider registry's active
    /// provider as the scheduler's analysis backend.
    pub fn new(config: Config, providers: ProviderRegistry, secrets: Arc<SecretsStore>) -> Result<Self, triage_provider::ProviderError> {
        let monitor = Monitor::new();
        monitor.start();

        let cache: TtlLruCache<String, CacheSlot> = TtlLruCache::new(
            "advice",
            config.cache_limit,
            (!config.cache_ttl.is_zero()).then_some(config.cache_ttl),
        );
        // Kept so pressure transitions can still reach the cache (§4.B) after
        // the cache itself is moved into the scheduler below — `TtlLruCache`
        // clones share the same underlying store.
        let cache_for_pressure = cache.clone();

        let provider = providers.active()?;
        let scheduler_config = SchedulerConfig::builder()
            .concurrency(config.concurrency)
            .queue_limit(config.queue_limit)
            .safe_threshold(config.safe_threshold)
            .metric_interval(config.metric_interval)
            .build();
        let scheduler = Scheduler::new(scheduler_config, monitor.clone(), cache, provider);

        let rate_limiter = RateLimiter::new(RateLimiterConfig::builder().build());

        let pipeline = Self {
            monitor: monitor.clone(),
            scheduler,
            rate_limiter,
            secrets,
            sanitizer: Arc::new(DefaultSanitizer::default()),
        };
        pipeline.wire_pressure_reactions(cache_for_pressure);
        Ok(pipeline)
    }

    /// Overrides the default [`DefaultSanitizer`] — used by host
    /// integrations that need a stricter or domain-specific redaction pass.
    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_scheduler_listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener<triage_scheduler::SchedulerEvent> + 'static,
    {
        self.scheduler = self.scheduler.with_event_listener(listener);
        self
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn secrets(&self) -> &Arc<SecretsStore> {
        &self.secrets
    }

    pub fn sanitizer(&self) -> &Arc<dyn Sanitizer> {
        &self.sanitizer
    }

    /// Subscribes the cache and rate limiter to pressure changes so both
    /// react without the caller having to wire this manually (§4.A "other
    /// subsystems subscribe to level changes"): the advice cache flushes on
    /// Critical and evicts its oldest half on High (§4.B), and the rate
    /// limiter's fallback sheds tracked identities the same way (§4.G).
    fn wire_pressure_reactions(&self, cache: TtlLruCache<String, CacheSlot>) {
        let mut subscription = self.monitor.subscribe();
        let rate_limiter = self.rate_limiter.clone();
        tokio::spawn(async move {
            loop {
                let level = subscription.changed().await;
                cache.on_pressure_change(level);
                rate_limiter.on_pressure_change(level);
            }
        });
    }

    /// `Handle(err, ctx, req?, res?, next?)` (§4.H). `responder` and `next`
    /// are both optional, matching the spec's `req?, res?, next?` — a
    /// headless caller (a background job, a non-HTTP consumer) passes
    /// `None` for both and still gets logging plus background analysis.
    ///
    /// Never awaits the analysis task itself: scheduling is fire-and-forget,
    /// matching §4.H step 6's "without awaiting."
    pub fn handle<R: Responder>(
        &self,
        err: Option<RawError>,
        responder: Option<&mut R>,
        next: Option<impl FnOnce(&ErrorRecord)>,
    ) {
        // Step 1: validate `err`.
        let Some(err) = err else {
            #[cfg(feature = "tracing")]
            tracing::warn!("triage pipeline handle() called with no error");
            return;
        };

        // Step 2: compute uniqueName/timestamp/errorRecord. A fresh
        // `ErrorRecord` is constructed on every call (new `unique_name` and
        // `timestamp_ms` each time) even when the same logical error recurs,
        // so repeated calls log distinctly while still sharing one
        // fingerprint downstream.
        let record = ErrorRecord::new(err.error_name, err.message, err.stack_trace, err.context)
            .with_status_code(err.status_code)
            .with_operational(err.is_operational);

        // Step 3: log at error severity.
        let log_record = LogRecord::from(&record);
        #[cfg(feature = "tracing")]
        tracing::error!(
            unique_name = %log_record.unique_name,
            status_code = log_record.status_code,
            is_operational = log_record.is_operational,
            message = %log_record.message,
            "application error"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = &log_record;

        // Step 4: emit a response, if a responder is present and nothing
        // has been written yet.
        let mut response_sent = false;
        if let Some(responder) = responder {
            if !responder.headers_sent() {
                if responder.prefers_html() {
                    let message = html_escape(&record.message);
                    let stack = html_escape(&record.stack_trace);
                    responder.write_html(record.status_code, &message, &stack);
                } else {
                    responder.write_json(record.status_code, &record);
                }
                response_sent = true;
            }
        }

        // Step 5: invoke the middleware continuation if present and no
        // response was sent.
        if !response_sent {
            if let Some(next) = next {
                next(&record);
            }
        }

        // Step 6: schedule analysis without awaiting; swallow rejections.
        let context = record.context.clone();
        match self.scheduler.schedule(record, context) {
            ScheduleOutcome::Admitted(handle) => {
                tokio::spawn(async move {
                    let _ = handle.wait().await;
                });
            }
            ScheduleOutcome::CacheHit(_) => {}
            ScheduleOutcome::Rejected(_reason) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(reason = %_reason, "analysis scheduling declined, expected under backpressure");
            }
        }
    }

    /// Drains the scheduler and stops the monitor's sampling loop. Callers
    /// that never invoke this simply leak the background tasks until
    /// process exit, matching §5's "all timers must be reference-unheld."
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.rate_limiter.shutdown();
        self.monitor.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use triage_core::Advice;
    use triage_provider::Provider;

    struct CountingProvider(Arc<AtomicUsize>);

    #[async_trait]
    impl Provider for CountingProvider {
        async fn analyze(&self, _prompt: &str) -> Option<Advice> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Some(Advice::Raw("fix it".to_string()))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct NullResponder {
        sent: bool,
    }

    impl Responder for NullResponder {
        fn headers_sent(&self) -> bool {
            self.sent
        }
        fn prefers_html(&self) -> bool {
            false
        }
        fn write_html(&mut self, _status_code: u16, _message: &str, _stack: &str) {
            self.sent = true;
        }
        fn write_json(&mut self, _status_code: u16, _record: &ErrorRecord) {
            self.sent = true;
        }
    }

    fn test_pipeline(calls: Arc<AtomicUsize>) -> ErrorPipeline {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(CountingProvider(calls)));
        let dir = tempfile::tempdir().unwrap();
        let secrets = Arc::new(
            SecretsStore::builder()
                .passphrase("correct horse battery staple!!")
                .path(dir.path().join("secrets.json"))
                .build()
                .unwrap(),
        );
        ErrorPipeline::new(Config::default(), registry, secrets).unwrap()
    }

    #[tokio::test]
    async fn missing_error_is_a_no_op() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = test_pipeline(calls);
        pipeline.handle::<NullResponder>(None, None, None::<fn(&ErrorRecord)>);
    }

    #[tokio::test]
    async fn writes_json_response_and_invokes_continuation_only_without_response() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = test_pipeline(calls);
        let mut responder = NullResponder { sent: false };
        let next_called = Arc::new(AtomicUsize::new(0));
        let next_called_inner = Arc::clone(&next_called);

        pipeline.handle(
            Some(RawError::new("TypeError", "boom")),
            Some(&mut responder),
            Some(move |_: &ErrorRecord| {
                next_called_inner.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(responder.sent);
        assert_eq!(next_called.load(Ordering::SeqCst), 0, "continuation skipped once a response was sent");
    }

    #[tokio::test]
    async fn continuation_runs_when_no_responder_is_present() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = test_pipeline(calls);
        let next_called = Arc::new(AtomicUsize::new(0));
        let next_called_inner = Arc::clone(&next_called);

        pipeline.handle::<NullResponder>(
            Some(RawError::new("TypeError", "boom")),
            None,
            Some(move |_: &ErrorRecord| {
                next_called_inner.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(next_called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_identical_error_calls_provider_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = test_pipeline(Arc::clone(&calls));

        for _ in 0..2 {
            pipeline.handle::<NullResponder>(
                Some(RawError::new("TypeError", "boom").with_stack_trace("a:1\nb:2")),
                None,
                None::<fn(&ErrorRecord)>,
            );
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "identical fingerprint should only invoke the provider once");
    }
}
