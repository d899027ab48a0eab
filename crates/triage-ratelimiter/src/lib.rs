//! Identity- and endpoint-aware rate limiter (§4.G).
//!
//! A distributed sliding-window backend (feature `distributed`, §4.G's
//! "server-side script" requirement) is the primary counter, guarded by a
//! circuit breaker; an always-compiled-in bounded in-memory limiter takes
//! over whenever the primary is unhealthy, so a dead Redis never blocks
//! application traffic.
//!
//! ```
//! use triage_ratelimiter::{RateLimiter, RateLimiterConfig, Policy};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let config = RateLimiterConfig::builder()
//!     .default_policy(Policy::new(Duration::from_secs(60), 100))
//!     .build();
//! let limiter = RateLimiter::new(config);
//!
//! let decision = limiter.check("203.0.113.7", "curl/8.0", "/api/errors").await;
//! if decision.limited {
//!     // reply 429 with Retry-After: decision.retry_after
//! }
//! # }
//! ```

mod backend;
mod breaker;
mod config;
#[cfg(feature = "distributed")]
mod distributed;
mod error;
mod events;
mod identity;
mod middleware;
mod policy;

pub use backend::{BackendError, BackendStats, CheckOutcome, FallbackLimiter, RateLimitBackend};
pub use breaker::CircuitState;
pub use config::{RateLimiterConfig, RateLimiterConfigBuilder};
#[cfg(feature = "distributed")]
pub use distributed::RedisBackend;
pub use error::RateLimiterError;
pub use events::RateLimiterEvent;
pub use identity::IdentityHasher;
pub use middleware::{format_reset, RateLimitHeaders, RateLimitOutcome, RateLimitRejection};
pub use policy::{Policy, PolicyTable};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use triage_core::PressureLevel;

use crate::breaker::GuardedBackend;

/// Outcome of a [`RateLimiter::check`] call — §4.G's `Check(...) ->
/// {count, limited, resetAt}`, plus the `Retry-After` a host adapter needs
/// to answer a rejected request with a 429.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub count: u64,
    pub limit: u64,
    pub limited: bool,
    pub reset_at_ms: u64,
    pub retry_after: Option<Duration>,
    /// Whether the in-memory fallback served this check rather than the
    /// distributed primary — either because no primary is configured or
    /// because the circuit guarding it is open. Surfaced to callers as §6's
    /// `fallbackMode` body field.
    pub fallback_mode: bool,
}

/// The rate limiter (§4.G). Cloning shares the same backends, policy table,
/// and janitor — clone freely across request handlers.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    policy: PolicyTable,
    identity: IdentityHasher,
    primary: Option<GuardedBackend<Arc<dyn RateLimitBackend>>>,
    fallback: Arc<FallbackLimiter>,
    config: RateLimiterConfig,
    janitor: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl RateLimiter {
    /// Builds a limiter with no distributed primary: every check goes
    /// straight to the in-memory fallback.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_primary(config, None)
    }

    /// Builds a limiter backed by `primary` (typically a [`RedisBackend`]
    /// behind the `distributed` feature), guarded by a circuit breaker that
    /// falls back to the in-memory limiter while the primary is unhealthy.
    pub fn with_primary(config: RateLimiterConfig, primary: Option<Arc<dyn RateLimitBackend>>) -> Self {
        let identity = IdentityHasher::with_capacity(config.identity_cache_size);
        let fallback = Arc::new(FallbackLimiter::new(config.fallback_max_entries));
        let guarded = primary.map(|backend| {
            GuardedBackend::new(backend, config.failure_threshold, config.breaker_reset_timeout)
        });
        let policy = PolicyTable::new(config.default_policy);

        let inner = Arc::new(Inner {
            policy,
            identity,
            primary: guarded,
            fallback,
            config,
            janitor: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });
        Self { inner }.with_janitor_started()
    }

    fn with_janitor_started(self) -> Self {
        self.start_janitor();
        self
    }

    /// Starts the periodic sweep that drops stale fallback entries (§4.G:
    /// "runs every 60s to drop entries older than 5 minutes"). No-op if
    /// already running.
    pub fn start_janitor(&self) {
        let mut handle = self.inner.janitor.lock().unwrap();
        if handle.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *handle = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(inner.config.janitor_interval);
            loop {
                tick.tick().await;
                if inner.shut_down.load(Ordering::Acquire) {
                    break;
                }
                inner.fallback.janitor_sweep(now_ms(), inner.config.janitor_max_age);
            }
        }));
    }

    /// Stops the janitor loop; safe to call more than once.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        if let Some(handle) = self.inner.janitor.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Runs `Check(identity, endpoint)` (§4.G). Never returns an error to
    /// the caller: if both the primary and the fallback fail (a defect,
    /// per spec "should be impossible"), the request is admitted and a
    /// [`RateLimiterEvent::BothBackendsFailed`] is emitted for the log.
    pub async fn check(&self, ip: &str, user_agent: &str, endpoint: &str) -> RateLimitDecision {
        let identity = self.inner.identity.derive(ip, user_agent);
        let policy = self.inner.policy.resolve(endpoint);
        let key = format!("{endpoint}:{identity}");
        let now = now_ms();

        let primary_outcome = match &self.inner.primary {
            Some(guarded) => match guarded.check(&key, policy.window, policy.max, now).await {
                Ok(outcome) => Some(outcome),
                Err(_) => None,
            },
            None => None,
        };

        let (outcome, fallback_mode) = match primary_outcome {
            Some(outcome) => (outcome, false),
            None => match self.inner.fallback.check(&key, policy.window, policy.max, now).await {
                Ok(outcome) => (outcome, true),
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(endpoint, "rate limiter: primary and fallback both failed, admitting request");
                    self.emit(RateLimiterEvent::BothBackendsFailed {
                        pattern_name: self.inner.config.name.clone(),
                        timestamp: Instant::now(),
                        endpoint: endpoint.to_string(),
                    });
                    (
                        CheckOutcome {
                            count: 0,
                            limited: false,
                            reset_at_ms: now + policy.window.as_millis() as u64,
                        },
                        true,
                    )
                }
            },
        };

        let decision = RateLimitDecision {
            count: outcome.count,
            limit: policy.max,
            limited: outcome.limited,
            reset_at_ms: outcome.reset_at_ms,
            retry_after: outcome.limited.then(|| Duration::from_millis(outcome.reset_at_ms.saturating_sub(now))),
            fallback_mode,
        };

        self.emit(if decision.limited {
            RateLimiterEvent::Limited {
                pattern_name: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                endpoint: endpoint.to_string(),
                count: decision.count,
                limit: decision.limit,
            }
        } else {
            RateLimiterEvent::Admitted {
                pattern_name: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                endpoint: endpoint.to_string(),
                count: decision.count,
                limit: decision.limit,
            }
        });

        decision
    }

    /// The `requestInterceptor` §4.G's `Middleware(endpoint, opts) ->
    /// requestInterceptor` contract describes: runs `check`, then assembles
    /// the §6 response surface a host adapter installs in front of a route —
    /// the `X-RateLimit-*` headers on every outcome, plus `Retry-After` and a
    /// structured 429 body when the caller is over budget. `triage-ratelimiter`
    /// depends on no web framework, so this hands back plain data; see
    /// `demos/axum-error-pipeline` for a handler that writes it onto a real
    /// response.
    pub async fn intercept(&self, ip: &str, user_agent: &str, endpoint: &str) -> RateLimitOutcome {
        let decision = self.check(ip, user_agent, endpoint).await;
        RateLimitOutcome::from_decision(&decision, endpoint)
    }

    /// Clears rate-limit state for one identity on one endpoint.
    pub async fn reset(&self, ip: &str, user_agent: &str, endpoint: &str) {
        let identity = self.inner.identity.derive(ip, user_agent);
        let key = format!("{endpoint}:{identity}");
        if let Some(guarded) = &self.inner.primary {
            let _ = guarded.reset(&key).await;
        }
        let _ = self.inner.fallback.reset(&key).await;
    }

    /// Installs or replaces the policy for a specific endpoint (§4.G
    /// "policies are editable at runtime").
    pub fn set_policy(&self, endpoint: impl Into<String>, policy: Policy) {
        self.inner.policy.set(endpoint, policy);
    }

    pub fn stats(&self) -> BackendStats {
        BackendStats {
            tracked_identities: self.inner.fallback.len(),
            backend_open: self
                .inner
                .primary
                .as_ref()
                .map(|g| g.state() == CircuitState::Open)
                .unwrap_or(false),
        }
    }

    /// Reacts to memory pressure (§4.G "memory-aware cache reconfiguration"):
    /// the fallback limiter sheds 30% of its tracked identities at `High`
    /// pressure and 50% at `Critical`, mirroring the eviction ratios
    /// `triage-cache` applies to the advice cache.
    pub fn on_pressure_change(&self, level: PressureLevel) {
        let fraction = match level {
            PressureLevel::Critical => 0.5,
            PressureLevel::High => 0.3,
            PressureLevel::Medium | PressureLevel::Low => 0.0,
        };
        if fraction > 0.0 {
            self.inner.fallback.evict_fraction(fraction);
        }
    }

    fn emit(&self, event: RateLimiterEvent) {
        self.inner.config.event_listeners.emit(&event);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn admits_up_to_policy_max_then_limits() {
        let config = RateLimiterConfig::builder()
            .default_policy(Policy::new(Duration::from_secs(60), 2))
            .build();
        let limiter = RateLimiter::new(config);

        let first = limiter.check("10.0.0.1", "curl/8.0", "/errors").await;
        assert!(!first.limited);
        let second = limiter.check("10.0.0.1", "curl/8.0", "/errors").await;
        assert!(!second.limited);
        let third = limiter.check("10.0.0.1", "curl/8.0", "/errors").await;
        assert!(third.limited);
        assert!(third.retry_after.is_some());
    }

    #[tokio::test]
    async fn distinct_identities_get_independent_budgets() {
        let config = RateLimiterConfig::builder()
            .default_policy(Policy::new(Duration::from_secs(60), 1))
            .build();
        let limiter = RateLimiter::new(config);

        assert!(!limiter.check("10.0.0.1", "agent-a", "/errors").await.limited);
        assert!(!limiter.check("10.0.0.2", "agent-a", "/errors").await.limited);
    }

    #[tokio::test]
    async fn reset_clears_the_identity() {
        let config = RateLimiterConfig::builder()
            .default_policy(Policy::new(Duration::from_secs(60), 1))
            .build();
        let limiter = RateLimiter::new(config);

        assert!(!limiter.check("10.0.0.1", "curl/8.0", "/errors").await.limited);
        assert!(limiter.check("10.0.0.1", "curl/8.0", "/errors").await.limited);
        limiter.reset("10.0.0.1", "curl/8.0", "/errors").await;
        assert!(!limiter.check("10.0.0.1", "curl/8.0", "/errors").await.limited);
    }

    struct AlwaysFailingBackend(AtomicUsize);

    #[async_trait]
    impl RateLimitBackend for AlwaysFailingBackend {
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

    #[tokio::test]
    async fn falls_back_to_in_memory_limiter_when_primary_fails() {
        let config = RateLimiterConfig::builder()
            .default_policy(Policy::new(Duration::from_secs(60), 1))
            .failure_threshold(100)
            .build();
        let primary: Arc<dyn RateLimitBackend> = Arc::new(AlwaysFailingBackend(AtomicUsize::new(0)));
        let limiter = RateLimiter::with_primary(config, Some(primary));

        let decision = limiter.check("10.0.0.1", "curl/8.0", "/errors").await;
        assert!(!decision.limited, "fallback should admit the first request");
        assert!(decision.fallback_mode, "decision should record that the fallback served it");
    }

    #[tokio::test]
    async fn primary_serving_the_request_is_not_reported_as_fallback_mode() {
        let config = RateLimiterConfig::builder()
            .default_policy(Policy::new(Duration::from_secs(60), 5))
            .build();
        let limiter = RateLimiter::new(config);

        let decision = limiter.check("10.0.0.1", "curl/8.0", "/errors").await;
        // No distributed primary is configured, so even the "normal" path
        // here goes through the in-memory limiter and is fallback mode —
        // this exercises the no-primary-configured branch specifically.
        assert!(decision.fallback_mode);
    }

    #[tokio::test]
    async fn intercept_sets_headers_and_429_body_once_limited() {
        let config = RateLimiterConfig::builder()
            .default_policy(Policy::new(Duration::from_secs(60), 1))
            .build();
        let limiter = RateLimiter::new(config);

        let first = limiter.intercept("10.0.0.1", "curl/8.0", "/errors").await;
        assert!(!first.is_limited());
        assert_eq!(first.headers().remaining, 0);

        let second = limiter.intercept("10.0.0.1", "curl/8.0", "/errors").await;
        assert!(second.is_limited());
        match second {
            RateLimitOutcome::Limited { body, retry_after_secs, .. } => {
                assert_eq!(body.endpoint, "/errors");
                assert_eq!(body.limit, 1);
                assert!(retry_after_secs >= 1);
            }
            _ => panic!("expected Limited"),
        }
    }

    #[tokio::test]
    async fn pressure_change_evicts_fallback_entries() {
        let config = RateLimiterConfig::builder().build();
        let limiter = RateLimiter::new(config);
        for i in 0..10 {
            limiter.check(&format!("10.0.0.{i}"), "curl/8.0", "/errors").await;
        }
        assert_eq!(limiter.stats().tracked_identities, 10);
        limiter.on_pressure_change(PressureLevel::Critical);
        assert!(limiter.stats().tracked_identities <= 5);
    }
}
