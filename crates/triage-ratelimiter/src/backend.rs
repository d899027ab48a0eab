//! The rate-limiting backend contract (§4.G) and its always-compiled-in
//! in-memory fallback. The primary, distributed backend lives in
//! [`crate::distributed`] behind the `distributed` feature; this module's
//! [`FallbackLimiter`] is what takes over when that backend is unhealthy.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;

/// Outcome of a single `check` call against a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutcome {
    pub count: u64,
    pub limited: bool,
    pub reset_at_ms: u64,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend transport error: {0}")]
    Transport(String),
}

/// Implemented by every rate-limit counting backend: the distributed
/// (redis-backed) primary and the in-memory fallback both implement this.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    async fn check(
        &self,
        key: &str,
        window: Duration,
        max: u64,
        now_ms: u64,
    ) -> Result<CheckOutcome, BackendError>;

    async fn reset(&self, key: &str) -> Result<(), BackendError>;
}

#[async_trait]
impl<T: RateLimitBackend + ?Sized> RateLimitBackend for std::sync::Arc<T> {
    async fn check(
        &self,
        key: &str,
        window: Duration,
        max: u64,
        now_ms: u64,
    ) -> Result<CheckOutcome, BackendError> {
        (**self).check(key, window, max, now_ms).await
    }

    async fn reset(&self, key: &str) -> Result<(), BackendError> {
        (**self).reset(key).await
    }
}

struct Entry {
    timestamps: VecDeque<u64>,
}

/// Bounded in-memory sliding-window limiter, used when the distributed
/// backend is unhealthy (§4.G "fallback in-memory limiter").
///
/// Bounded by `max_entries` via LRU eviction; a periodic janitor (started
/// separately by the owning [`crate::RateLimiter`]) drops timestamps older
/// than 5 minutes across all entries.
pub struct FallbackLimiter {
    entries: Mutex<LruCache<String, Entry>>,
}

impl FallbackLimiter {
    pub fn new(max_entries: usize) -> Self {
        let cap = std::num::NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Drops entries whose every timestamp has aged past `max_age` and, for
    /// surviving entries, prunes individual stale timestamps. Run by the
    /// janitor on a fixed interval (§4.G: "every 60s to drop entries older
    /// than 5 minutes").
    pub fn janitor_sweep(&self, now_ms: u64, max_age: Duration) {
        let mut entries = self.entries.lock().unwrap();
        let cutoff = now_ms.saturating_sub(max_age.as_millis() as u64);
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.timestamps.back().copied().unwrap_or(0) < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    /// Evicts a fraction of entries under memory pressure (§4.G: 30% at
    /// ≥80% utilization, 50% at ≥95%).
    pub fn evict_fraction(&self, fraction: f64) {
        let mut entries = self.entries.lock().unwrap();
        let to_evict = ((entries.len() as f64) * fraction).ceil() as usize;
        for _ in 0..to_evict {
            if entries.pop_lru().is_none() {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RateLimitBackend for FallbackLimiter {
    async fn check(
        &self,
        key: &str,
        window: Duration,
        max: u64,
        now_ms: u64,
    ) -> Result<CheckOutcome, BackendError> {
        let window_ms = window.as_millis() as u64;
        let cutoff = now_ms.saturating_sub(window_ms);
        let mut entries = self.entries.lock().unwrap();

        let mut entry = entries.pop(key).unwrap_or_else(|| Entry {
            timestamps: VecDeque::new(),
        });
        while let Some(&front) = entry.timestamps.front() {
            if front < cutoff {
                entry.timestamps.pop_front();
            } else {
                break;
            }
        }

        let count = entry.timestamps.len() as u64;
        let outcome = if count >= max {
            CheckOutcome {
                count,
                limited: true,
                reset_at_ms: now_ms + window_ms,
            }
        } else {
            entry.timestamps.push_back(now_ms);
            CheckOutcome {
                count: count + 1,
                limited: false,
                reset_at_ms: now_ms + window_ms,
            }
        };
        entries.put(key.to_string(), entry);
        Ok(outcome)
    }

    async fn reset(&self, key: &str) -> Result<(), BackendError> {
        self.entries.lock().unwrap().pop(key);
        Ok(())
    }
}

/// Snapshot statistics exposed by [`crate::RateLimiter::stats`].
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    pub tracked_identities: usize,
    pub backend_open: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_max_then_limits() {
        let limiter = FallbackLimiter::new(10);
        for i in 0..3 {
            let outcome = limiter.check("id", Duration::from_secs(10), 3, i).await.unwrap();
            assert!(!outcome.limited, "request {i} should be admitted");
        }
        let outcome = limiter.check("id", Duration::from_secs(10), 3, 3).await.unwrap();
        assert!(outcome.limited);
    }

    #[tokio::test]
    async fn window_slides_timestamps_out() {
        let limiter = FallbackLimiter::new(10);
        for i in 0..3 {
            limiter.check("id", Duration::from_millis(100), 3, i).await.unwrap();
        }
        let outcome = limiter.check("id", Duration::from_millis(100), 3, 250).await.unwrap();
        assert!(!outcome.limited);
    }

    #[tokio::test]
    async fn reset_clears_identity() {
        let limiter = FallbackLimiter::new(10);
        limiter.check("id", Duration::from_secs(10), 1, 0).await.unwrap();
        assert!(limiter.check("id", Duration::from_secs(10), 1, 1).await.unwrap().limited);
        limiter.reset("id").await.unwrap();
        assert!(!limiter.check("id", Duration::from_secs(10), 1, 2).await.unwrap().limited);
    }

    #[test]
    fn evict_fraction_drops_lru_entries() {
        let limiter = FallbackLimiter::new(10);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            for i in 0..10u64 {
                limiter.check(&format!("id-{i}"), Duration::from_secs(60), 100, 0).await.unwrap();
            }
        });
        limiter.evict_fraction(0.3);
        assert_eq!(limiter.len(), 7);
    }
}
