//! The §4.G `Middleware(endpoint, opts) -> requestInterceptor` contract and
//! §6's rate-limit response surface, assembled independently of any host
//! framework — mirroring how `triage::Responder` keeps the pipeline itself
//! framework-agnostic.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::RateLimitDecision;

/// The three `X-RateLimit-*` headers set on every checked request (§4.G "On
/// admission: set headers", §6 "Rate-limit response headers").
#[derive(Debug, Clone)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// ISO-8601 UTC, e.g. `2026-07-28T12:00:00Z`.
    pub reset: String,
}

impl RateLimitHeaders {
    /// Renders as `(name, value)` pairs ready to set on a response.
    pub fn as_pairs(&self) -> [(&'static str, String); 3] {
        [
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset.clone()),
        ]
    }
}

/// The 429 body (§6): `{error, endpoint, retryAfter, limit, current,
/// fallbackMode?}`. `fallback_mode` is only set when the in-memory fallback
/// served the rejected check, matching the field's `?` in the spec.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitRejection {
    pub error: String,
    pub endpoint: String,
    #[serde(rename = "retryAfter")]
    pub retry_after: u64,
    pub limit: u64,
    pub current: u64,
    #[serde(rename = "fallbackMode", skip_serializing_if = "Option::is_none")]
    pub fallback_mode: Option<bool>,
}

/// What a host adapter does with one checked request: set headers on every
/// outcome, and on [`RateLimitOutcome::Limited`] short-circuit with a 429
/// instead of calling the wrapped handler.
#[derive(Debug, Clone)]
pub enum RateLimitOutcome {
    Admitted {
        headers: RateLimitHeaders,
    },
    Limited {
        headers: RateLimitHeaders,
        retry_after_secs: u64,
        body: RateLimitRejection,
    },
}

impl RateLimitOutcome {
    pub(crate) fn from_decision(decision: &RateLimitDecision, endpoint: &str) -> Self {
        let remaining = decision.limit.saturating_sub(decision.count);
        let headers = RateLimitHeaders {
            limit: decision.limit,
            remaining,
            reset: format_reset(decision.reset_at_ms),
        };

        if !decision.limited {
            return RateLimitOutcome::Admitted { headers };
        }

        let retry_after_secs = decision
            .retry_after
            .map(|d| d.as_secs().max(1))
            .unwrap_or(1);

        RateLimitOutcome::Limited {
            headers,
            retry_after_secs,
            body: RateLimitRejection {
                error: "rate limit exceeded".to_string(),
                endpoint: endpoint.to_string(),
                retry_after: retry_after_secs,
                limit: decision.limit,
                current: decision.count,
                fallback_mode: decision.fallback_mode.then_some(true),
            },
        }
    }

    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitOutcome::Limited { .. })
    }

    /// The headers to set on the response regardless of outcome.
    pub fn headers(&self) -> &RateLimitHeaders {
        match self {
            RateLimitOutcome::Admitted { headers } => headers,
            RateLimitOutcome::Limited { headers, .. } => headers,
        }
    }
}

/// Formats a millisecond Unix timestamp as ISO-8601 UTC, e.g.
/// `2026-07-28T12:00:00Z` (§6 "`X-RateLimit-Reset` (ISO-8601 UTC)").
pub fn format_reset(reset_at_ms: u64) -> String {
    let secs = (reset_at_ms / 1000) as i64;
    let nanos = ((reset_at_ms % 1000) * 1_000_000) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn format_reset_renders_iso8601_utc() {
        // 2026-07-28T00:00:00Z
        assert_eq!(format_reset(1_785_024_000_000), "2026-07-28T00:00:00Z");
    }

    fn decision(limited: bool, fallback_mode: bool) -> RateLimitDecision {
        RateLimitDecision {
            count: 5,
            limit: 5,
            limited,
            reset_at_ms: 1_785_024_000_000,
            retry_after: limited.then(|| Duration::from_secs(30)),
            fallback_mode,
        }
    }

    #[test]
    fn admitted_decision_yields_headers_only() {
        let outcome = RateLimitOutcome::from_decision(&decision(false, false), "/errors");
        assert!(!outcome.is_limited());
        assert_eq!(outcome.headers().remaining, 0);
    }

    #[test]
    fn limited_decision_yields_body_with_retry_after() {
        let outcome = RateLimitOutcome::from_decision(&decision(true, false), "/errors");
        match outcome {
            RateLimitOutcome::Limited { body, retry_after_secs, .. } => {
                assert_eq!(retry_after_secs, 30);
                assert_eq!(body.endpoint, "/errors");
                assert_eq!(body.retry_after, 30);
                assert_eq!(body.fallback_mode, None);
            }
            _ => panic!("expected Limited"),
        }
    }

    #[test]
    fn fallback_mode_is_surfaced_when_the_fallback_served_the_rejection() {
        let outcome = RateLimitOutcome::from_decision(&decision(true, true), "/errors");
        match outcome {
            RateLimitOutcome::Limited { body, .. } => assert_eq!(body.fallback_mode, Some(true)),
            _ => panic!("expected Limited"),
        }
    }
}
