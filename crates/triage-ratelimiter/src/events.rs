use std::time::Instant;
use triage_core::events::ResilienceEvent;

use crate::breaker::CircuitState;

/// Events emitted by the rate limiter (§4.G).
#[derive(Debug, Clone)]
pub enum RateLimiterEvent {
    /// The check admitted the request.
    Admitted {
        pattern_name: String,
        timestamp: Instant,
        endpoint: String,
        count: u64,
        limit: u64,
    },
    /// The check rejected the request; a 429 with `Retry-After` is expected.
    Limited {
        pattern_name: String,
        timestamp: Instant,
        endpoint: String,
        count: u64,
        limit: u64,
    },
    /// The distributed backend's circuit breaker changed state.
    BreakerStateChanged {
        pattern_name: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// Both the distributed backend and the fallback failed; the request
    /// was admitted anyway per the "never block traffic" failure model.
    BothBackendsFailed {
        pattern_name: String,
        timestamp: Instant,
        endpoint: String,
    },
}

impl ResilienceEvent for RateLimiterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RateLimiterEvent::Admitted { .. } => "admitted",
            RateLimiterEvent::Limited { .. } => "limited",
            RateLimiterEvent::BreakerStateChanged { .. } => "breaker_state_changed",
            RateLimiterEvent::BothBackendsFailed { .. } => "both_backends_failed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateLimiterEvent::Admitted { timestamp, .. }
            | RateLimiterEvent::Limited { timestamp, .. }
            | RateLimiterEvent::BreakerStateChanged { timestamp, .. }
            | RateLimiterEvent::BothBackendsFailed { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            RateLimiterEvent::Admitted { pattern_name, .. }
            | RateLimiterEvent::Limited { pattern_name, .. }
            | RateLimiterEvent::BreakerStateChanged { pattern_name, .. }
            | RateLimiterEvent::BothBackendsFailed { pattern_name, .. } => pattern_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_names() {
        let now = Instant::now();
        let limited = RateLimiterEvent::Limited {
            pattern_name: "api".to_string(),
            timestamp: now,
            endpoint: "/login".to_string(),
            count: 6,
            limit: 5,
        };
        assert_eq!(limited.event_type(), "limited");
        assert_eq!(limited.pattern_name(), "api");
    }
}
