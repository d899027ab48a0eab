use std::time::Duration;

use triage_core::events::{EventListeners, FnListener};

use crate::events::RateLimiterEvent;
use crate::policy::Policy;

/// Configuration for [`crate::RateLimiter`] (§4.G). Every duration here
/// mirrors a §6 environment variable at the facade layer; this crate takes
/// already-parsed values and does not read the environment itself.
pub struct RateLimiterConfig {
    pub(crate) default_policy: Policy,
    pub(crate) failure_threshold: usize,
    pub(crate) breaker_reset_timeout: Duration,
    pub(crate) fallback_max_entries: usize,
    pub(crate) identity_cache_size: usize,
    pub(crate) janitor_interval: Duration,
    pub(crate) janitor_max_age: Duration,
    pub(crate) event_listeners: EventListeners<RateLimiterEvent>,
    pub(crate) name: String,
}

/// Builder for [`RateLimiterConfig`].
pub struct RateLimiterConfigBuilder {
    default_policy: Policy,
    failure_threshold: usize,
    breaker_reset_timeout: Duration,
    fallback_max_entries: usize,
    identity_cache_size: usize,
    janitor_interval: Duration,
    janitor_max_age: Duration,
    event_listeners: EventListeners<RateLimiterEvent>,
    name: String,
}

impl Default for RateLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterConfigBuilder {
    /// Defaults match §4.G: 100 req/60s default policy, 25-entry identity
    /// cache, breaker opens after 5 consecutive backend failures and
    /// resets after 60s, janitor sweeps every 60s dropping entries idle
    /// past 5 minutes.
    pub fn new() -> Self {
        Self {
            default_policy: Policy::default(),
            failure_threshold: 5,
            breaker_reset_timeout: Duration::from_secs(60),
            fallback_max_entries: 10_000,
            identity_cache_size: 25,
            janitor_interval: Duration::from_secs(60),
            janitor_max_age: Duration::from_secs(300),
            event_listeners: EventListeners::new(),
            name: "rate-limiter".to_string(),
        }
    }

    pub fn default_policy(mut self, policy: Policy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn breaker_reset_timeout(mut self, duration: Duration) -> Self {
        self.breaker_reset_timeout = duration;
        self
    }

    pub fn fallback_max_entries(mut self, max: usize) -> Self {
        self.fallback_max_entries = max;
        self
    }

    pub fn identity_cache_size(mut self, size: usize) -> Self {
        self.identity_cache_size = size;
        self
    }

    pub fn janitor_interval(mut self, duration: Duration) -> Self {
        self.janitor_interval = duration;
        self
    }

    pub fn janitor_max_age(mut self, duration: Duration) -> Self {
        self.janitor_max_age = duration;
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback fired whenever a check admits a request.
    pub fn on_admitted<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, u64, u64) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RateLimiterEvent::Admitted { endpoint, count, limit, .. } = event {
                f(endpoint, *count, *limit);
            }
        }));
        self
    }

    /// Registers a callback fired whenever a check rejects a request.
    pub fn on_limited<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, u64, u64) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RateLimiterEvent::Limited { endpoint, count, limit, .. } = event {
                f(endpoint, *count, *limit);
            }
        }));
        self
    }

    pub fn build(self) -> RateLimiterConfig {
        RateLimiterConfig {
            default_policy: self.default_policy,
            failure_threshold: self.failure_threshold,
            breaker_reset_timeout: self.breaker_reset_timeout,
            fallback_max_entries: self.fallback_max_entries,
            identity_cache_size: self.identity_cache_size,
            janitor_interval: self.janitor_interval,
            janitor_max_age: self.janitor_max_age,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }
}

impl RateLimiterConfig {
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }
}
