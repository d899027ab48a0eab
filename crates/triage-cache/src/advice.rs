//! The bounded LRU/TTL cache used for advice memoization and for staging
//! full error/context blobs under `error_full_<signatureId>` while a task is queued.

use crate::eviction::EvictionPolicy;
use crate::store::CacheStore;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use triage_core::PressureLevel;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// A bounded, TTL-aware cache generalized over key and value — the advice
/// cache keyed by fingerprint and the `error_full_<signatureId>` staging
/// area are both instances of this same type.
///
/// `max_entries = 0` disables the cache entirely at construction: all
/// writes become no-ops and all reads miss, and no purge timer is ever
/// started (§9 design note — reject `max=0` at the cache layer, not the
/// call site).
#[derive(Clone)]
pub struct TtlLruCache<K, V> {
    name: String,
    inner: CacheInner<K, V>,
}

#[derive(Clone)]
enum CacheInner<K, V> {
    Disabled,
    Enabled(Arc<EnabledCache<K, V>>),
}

struct EnabledCache<K, V> {
    store: Mutex<CacheStore<K, V>>,
    purge_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> TtlLruCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, max_entries: usize, ttl: Option<Duration>) -> Self {
        let name = name.into();
        if max_entries == 0 {
            return Self {
                name,
                inner: CacheInner::Disabled,
            };
        }
        let store = CacheStore::new(max_entries, ttl, EvictionPolicy::Lru);
        Self {
            name,
            inner: CacheInner::Enabled(Arc::new(EnabledCache {
                store: Mutex::new(store),
                purge_handle: Mutex::new(None),
            })),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.inner, CacheInner::Disabled)
    }

    /// O(1) lookup; updates LRU position; skips (and evicts) expired entries.
    pub fn get(&self, key: &K) -> Option<V> {
        match &self.inner {
            CacheInner::Disabled => None,
            CacheInner::Enabled(cache) => {
                let value = cache.store.lock().unwrap().get(key);
                #[cfg(feature = "metrics")]
                {
                    let outcome = if value.is_some() { "hit" } else { "miss" };
                    counter!("triage_cache_lookups_total", "cache" => self.name.clone(), "result" => outcome)
                        .increment(1);
                }
                value
            }
        }
    }

    /// O(1) insert; evicts LRU entry if over capacity; respects TTL.
    /// Starts the purge timer if this is the first write since the cache went idle.
    pub fn set(&self, key: K, value: V) {
        let CacheInner::Enabled(cache) = &self.inner else {
            return;
        };
        {
            let mut store = cache.store.lock().unwrap();
            store.insert(key, value);
            #[cfg(feature = "metrics")]
            gauge!("triage_cache_size", "cache" => self.name.clone()).set(store.len() as f64);
        }
        self.ensure_purge_timer_running(cache);
    }

    /// Removes expired entries; amortized O(n_expired). Stops the background
    /// timer if the cache becomes empty; the next `set` restarts it.
    pub fn purge(&self) -> usize {
        let CacheInner::Enabled(cache) = &self.inner else {
            return 0;
        };
        let mut store = cache.store.lock().unwrap();
        let removed = store.purge_expired();
        if store.is_empty() {
            drop(store);
            if let Some(handle) = cache.purge_handle.lock().unwrap().take() {
                handle.abort();
            }
        }
        removed
    }

    pub fn clear(&self) {
        if let CacheInner::Enabled(cache) = &self.inner {
            cache.store.lock().unwrap().clear();
        }
    }

    pub fn size(&self) -> usize {
        match &self.inner {
            CacheInner::Disabled => 0,
            CacheInner::Enabled(cache) => cache.store.lock().unwrap().len(),
        }
    }

    /// Reacts to a pressure-level change by reconfiguring the cache per
    /// spec: flush entirely on Critical; evict the oldest 50% (bounded to
    /// 1000 per pass) on High.
    pub fn on_pressure_change(&self, level: PressureLevel) {
        let CacheInner::Enabled(cache) = &self.inner else {
            return;
        };
        let mut store = cache.store.lock().unwrap();
        match level {
            PressureLevel::Critical => {
                store.clear();
                #[cfg(feature = "tracing")]
                tracing::warn!(cache = %self.name, "flushed cache under critical memory pressure");
            }
            PressureLevel::High => {
                let evicted = store.evict_fraction(0.5, 1000);
                #[cfg(feature = "tracing")]
                tracing::info!(cache = %self.name, evicted, "evicted oldest entries under high memory pressure");
            }
            PressureLevel::Medium | PressureLevel::Low => {}
        }
    }

    fn ensure_purge_timer_running(&self, cache: &Arc<EnabledCache<K, V>>) {
        let ttl = cache.store.lock().unwrap().ttl();
        let Some(ttl) = ttl else {
            return; // TTL=0 (None) ⇒ no expiry, no purge timer.
        };
        let mut handle_guard = cache.purge_handle.lock().unwrap();
        if handle_guard.is_some() {
            return;
        }
        let cache = Arc::clone(cache);
        *handle_guard = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(ttl).await;
                let mut store = cache.store.lock().unwrap();
                store.purge_expired();
                if store.is_empty() {
                    drop(store);
                    *cache.purge_handle.lock().unwrap() = None;
                    return;
                }
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_disables_cache() {
        let cache: TtlLruCache<String, String> = TtlLruCache::new("advice", 0, None);
        cache.set("k".to_string(), "v".to_string());
        assert_eq!(cache.get(&"k".to_string()), None);
        assert_eq!(cache.size(), 0);
        assert!(cache.is_disabled());
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache: TtlLruCache<String, String> = TtlLruCache::new("advice", 10, None);
        cache.set("k".to_string(), "v".to_string());
        assert_eq!(cache.get(&"k".to_string()), Some("v".to_string()));
    }

    #[tokio::test]
    async fn ttl_expiry_evicts_on_purge() {
        let cache: TtlLruCache<String, String> =
            TtlLruCache::new("advice", 10, Some(Duration::from_millis(20)));
        cache.set("k".to_string(), "v".to_string());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[test]
    fn critical_pressure_flushes_cache() {
        let cache: TtlLruCache<String, String> = TtlLruCache::new("advice", 10, None);
        cache.set("a".to_string(), "1".to_string());
        cache.set("b".to_string(), "2".to_string());
        cache.on_pressure_change(PressureLevel::Critical);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn high_pressure_evicts_half() {
        let cache: TtlLruCache<String, String> = TtlLruCache::new("advice", 10, None);
        for i in 0..4 {
            cache.set(format!("k{i}"), i.to_string());
        }
        cache.on_pressure_change(PressureLevel::High);
        assert_eq!(cache.size(), 2);
    }
}
