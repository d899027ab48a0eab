use std::fmt;
use std::time::Duration;
use triage_core::ResilienceError;

/// Errors surfaced by the rate limiter's public API. The admission path
/// itself never returns an error for an ordinary rate-limited check — that
/// is a [`crate::CheckOutcome`] with `limited: true` — these variants cover
/// misuse and the (should-be-impossible, §4.G "Failure model") case where
/// both backends fail.
#[derive(Debug, Clone)]
pub enum RateLimiterError {
    /// Both the distributed backend and the in-memory fallback failed.
    /// Per spec the caller should still admit the request; this variant
    /// exists so the fault can be logged by whoever calls `check`.
    BothBackendsFailed,
}

impl fmt::Display for RateLimiterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimiterError::BothBackendsFailed => {
                write!(f, "rate limiter: distributed backend and fallback both failed")
            }
        }
    }
}

impl std::error::Error for RateLimiterError {}

impl<E> From<RateLimiterError> for ResilienceError<E> {
    fn from(_err: RateLimiterError) -> Self {
        ResilienceError::RateLimited { retry_after: Some(Duration::from_secs(1)) }
    }
}
