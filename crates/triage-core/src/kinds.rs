//! The ten error kinds surfaced by the pipeline (§7), and why/how each is handled.

use std::fmt;
use std::time::Duration;

/// Classifies every failure the pipeline can surface to a caller or to logs.
///
/// Most variants are best-effort: the pipeline never crashes the host on an
/// internal failure of the analysis path. [`ErrorKind::DecryptFailure`] is the
/// sole hard error — it is returned to the key-management API directly rather
/// than degrading silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Admission rejected: the memory-pressure-adjusted queue limit was reached.
    QueueFull,
    /// Admission rejected: the hard absolute cap was reached.
    AbsoluteMax,
    /// Admission rejected under Critical pressure: the signature was too large to queue.
    TooLarge,
    /// A task exceeded its deadline, or an HTTP attempt timed out at the transport level.
    Timeout,
    /// The provider never returned a usable response after exhausting retries.
    ProviderUnavailable,
    /// The provider returned output that didn't parse into [`crate::Advice`].
    ParseFailure,
    /// The cache is unavailable; the caller should degrade to no-cache behavior.
    CacheUnavailable,
    /// The rate limiter rejected the request.
    RateLimited { retry_after: Option<Duration> },
    /// The rate limiter's distributed backend is unavailable; fallback is in use.
    BackendUnavailable,
    /// Authenticated decryption failed; never returns a plaintext fallback.
    DecryptFailure,
}

impl ErrorKind {
    /// Whether the pipeline should swallow this outcome (log and move on) rather
    /// than surface it as a hard error to a caller.
    pub fn is_best_effort(&self) -> bool {
        !matches!(self, ErrorKind::DecryptFailure)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ErrorKind::RateLimited { .. })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::QueueFull => write!(f, "queue full"),
            ErrorKind::AbsoluteMax => write!(f, "absolute max queue size reached"),
            ErrorKind::TooLarge => write!(f, "signature too large under critical pressure"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::ProviderUnavailable => write!(f, "provider unavailable"),
            ErrorKind::ParseFailure => write!(f, "advice parse failure"),
            ErrorKind::CacheUnavailable => write!(f, "cache unavailable"),
            ErrorKind::RateLimited { retry_after } => match retry_after {
                Some(d) => write!(f, "rate limited, retry after {:?}", d),
                None => write!(f, "rate limited"),
            },
            ErrorKind::BackendUnavailable => write!(f, "rate limiter backend unavailable"),
            ErrorKind::DecryptFailure => write!(f, "decryption failed"),
        }
    }
}

impl std::error::Error for ErrorKind {}

/// Why the scheduler declined to admit a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    QueueFull,
    AbsoluteMax,
    TooLarge,
    Shutdown,
}

impl From<RejectReason> for ErrorKind {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::QueueFull => ErrorKind::QueueFull,
            RejectReason::AbsoluteMax => ErrorKind::AbsoluteMax,
            RejectReason::TooLarge => ErrorKind::TooLarge,
            RejectReason::Shutdown => ErrorKind::Timeout,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QueueFull => write!(f, "queue full"),
            RejectReason::AbsoluteMax => write!(f, "absolute max"),
            RejectReason::TooLarge => write!(f, "too large"),
            RejectReason::Shutdown => write!(f, "shutdown"),
        }
    }
}
