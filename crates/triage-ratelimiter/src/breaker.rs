//! Circuit breaker guarding the distributed backend (§4.G). Deliberately
//! self-contained rather than wrapping `triage-circuitbreaker`'s generic
//! Tower `Service` machinery — the backend call here is a single typed
//! async method, not a `Service<Req>`, so a direct state machine is a
//! better fit than threading it through a `Layer`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::backend::{BackendError, CheckOutcome, RateLimitBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Wraps a [`RateLimitBackend`] with open/half-open/closed accounting
/// (§4.G "Circuit breaker around the distributed backend"). `B` is
/// typically `Arc<dyn RateLimitBackend>` so [`crate::RateLimiter`] can hold
/// one concrete guarded-backend type regardless of which backend is
/// plugged in behind it.
pub struct GuardedBackend<B: RateLimitBackend> {
    backend: B,
    failure_threshold: usize,
    reset_timeout: Duration,
    state: Mutex<CircuitState>,
    failures: AtomicUsize,
    opened_at_ms: AtomicU64,
    half_open_gate: Mutex<()>,
}

impl<B: RateLimitBackend> GuardedBackend<B> {
    pub fn new(backend: B, failure_threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            backend,
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            state: Mutex::new(CircuitState::Closed),
            failures: AtomicUsize::new(0),
            opened_at_ms: AtomicU64::new(0),
            half_open_gate: Mutex::new(()),
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock().unwrap()
    }

    /// Resets `key` directly against the backend. Deliberately bypasses the
    /// breaker's failure accounting — an explicit reset is an administrative
    /// action, not a signal about backend health.
    pub async fn reset(&self, key: &str) -> Result<(), BackendError> {
        self.backend.reset(key).await
    }

    /// Attempts a backend call through the breaker. Returns `Err(None)` when
    /// the circuit is open (caller should fall back without touching the
    /// backend); `Err(Some(_))` when the backend itself failed.
    pub async fn check(
        &self,
        key: &str,
        window: Duration,
        max: u64,
        now_ms: u64,
    ) -> Result<CheckOutcome, Option<BackendError>> {
        match self.state() {
            CircuitState::Open => {
                if self.elapsed_since_open(now_ms) >= self.reset_timeout {
                    self.try_half_open(key, window, max, now_ms).await
                } else {
                    Err(None)
                }
            }
            CircuitState::HalfOpen => self.try_half_open(key, window, max, now_ms).await,
            CircuitState::Closed => self.call_through(key, window, max, now_ms).await,
        }
    }

    async fn try_half_open(
        &self,
        key: &str,
        window: Duration,
        max: u64,
        now_ms: u64,
    ) -> Result<CheckOutcome, Option<BackendError>> {
        let Ok(_permit) = self.half_open_gate.try_lock() else {
            // another caller is already probing; treat as still open
            return Err(None);
        };
        *self.state.lock().unwrap() = CircuitState::HalfOpen;
        match self.backend.check(key, window, max, now_ms).await {
            Ok(outcome) => {
                self.close();
                Ok(outcome)
            }
            Err(err) => {
                self.open(now_ms);
                Err(Some(err))
            }
        }
    }

    async fn call_through(
        &self,
        key: &str,
        window: Duration,
        max: u64,
        now_ms: u64,
    ) -> Result<CheckOutcome, Option<BackendError>> {
        match self.backend.check(key, window, max, now_ms).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if self.failures.fetch_add(1, Ordering::AcqRel) + 1 >= self.failure_threshold {
                    self.open(now_ms);
                }
                Err(Some(err))
            }
        }
    }

    fn open(&self, now_ms: u64) {
        *self.state.lock().unwrap() = CircuitState::Open;
        self.opened_at_ms.store(now_ms, Ordering::Release);
        #[cfg(feature = "tracing")]
        tracing::warn!("rate limiter distributed backend circuit opened");
        #[cfg(feature = "metrics")]
        metrics::counter!("triage_ratelimiter_breaker_opened_total").increment(1);
    }

    fn close(&self) {
        *self.state.lock().unwrap() = CircuitState::Closed;
        self.failures.store(0, Ordering::Release);
        #[cfg(feature = "tracing")]
        tracing::info!("rate limiter distributed backend circuit closed");
    }

    /// `now_ms` lives in the same caller-supplied clock as every other
    /// `check` argument (epoch millis in production, a test-controlled
    /// counter in unit tests) — not `Instant`, so breaker timing stays
    /// consistent with the sliding-window arithmetic it guards.
    fn elapsed_since_open(&self, now_ms: u64) -> Duration {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        Duration::from_millis(now_ms.saturating_sub(opened))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Arc;

    struct AlwaysFails(StdAtomicUsize);

    #[async_trait]
    impl RateLimitBackend for AlwaysFails {
        async fn check(
            &self,
            _key: &str,
            _window: Duration,
            _max: u64,
            _now_ms: u64,
        ) -> Result<CheckOutcome, BackendError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Transport("down".to_string()))
        }

        async fn reset(&self, _key: &str) -> Result<(), BackendError> {
            Ok(())
        }
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl RateLimitBackend for AlwaysSucceeds {
        async fn check(
            &self,
            _key: &str,
            _window: Duration,
            _max: u64,
            now_ms: u64,
        ) -> Result<CheckOutcome, BackendError> {
            Ok(CheckOutcome {
                count: 1,
                limited: false,
                reset_at_ms: now_ms,
            })
        }

        async fn reset(&self, _key: &str) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_and_skips_backend() {
        let backend = Arc::new(AlwaysFails(StdAtomicUsize::new(0)));
        let guarded = GuardedBackend::new(Arc::clone(&backend), 2, Duration::from_secs(60));

        for _ in 0..2 {
            let _ = guarded.check("k", Duration::from_secs(1), 10, 1).await;
        }
        assert_eq!(guarded.state(), CircuitState::Open);

        let calls_before = backend.0.load(Ordering::SeqCst);
        let result = guarded.check("k", Duration::from_secs(1), 10, 2).await;
        assert!(matches!(result, Err(None)));
        assert_eq!(backend.0.load(Ordering::SeqCst), calls_before);
    }

    /// Fails its first call (tripping the breaker), succeeds every call after.
    struct FailsOnceThenSucceeds(StdAtomicUsize);

    #[async_trait]
    impl RateLimitBackend for FailsOnceThenSucceeds {
        async fn check(
            &self,
            _key: &str,
            _window: Duration,
            _max: u64,
            now_ms: u64,
        ) -> Result<CheckOutcome, BackendError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BackendError::Transport("down".to_string()))
            } else {
                Ok(CheckOutcome {
                    count: 1,
                    limited: false,
                    reset_at_ms: now_ms,
                })
            }
        }

        async fn reset(&self, _key: &str) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn half_open_success_closes_circuit() {
        let backend = Arc::new(FailsOnceThenSucceeds(StdAtomicUsize::new(0)));
        let guarded = GuardedBackend::new(Arc::clone(&backend), 1, Duration::from_millis(0));

        let first = guarded.check("k", Duration::from_secs(1), 10, 0).await;
        assert!(matches!(first, Err(Some(_))));
        assert_eq!(guarded.state(), CircuitState::Open);

        // reset_timeout is 0ms, so the very next call probes half-open immediately
        let second = guarded.check("k", Duration::from_secs(1), 10, 1).await;
        assert!(second.is_ok());
        assert_eq!(guarded.state(), CircuitState::Closed);
    }
}
