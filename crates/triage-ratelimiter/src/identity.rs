//! Rate-limiting identity derivation (§4.G): caller IP plus a bounded,
//! non-cryptographic hash of the User-Agent, so two clients behind the same
//! IP with different agents still spread across the key space without
//! paying a cryptographic hash per request.

use std::sync::Mutex;

use fnv::FnvHasher;
use lru::LruCache;
use std::hash::Hasher;
use std::num::NonZeroUsize;

const MAX_HASH_INPUT_LEN: usize = 200;
const DEFAULT_UA_CACHE_SIZE: usize = 25;

/// Caches hashed User-Agent strings so repeat clients don't re-hash on every
/// request. Bounded to a small LRU per spec.md §4.G ("cached in a small LRU,
/// default 25 entries").
pub struct IdentityHasher {
    cache: Mutex<LruCache<String, u64>>,
}

impl IdentityHasher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_UA_CACHE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Derives a rate-limiting identity from `ip` and `user_agent`.
    pub fn derive(&self, ip: &str, user_agent: &str) -> String {
        let capped: &str = truncate(user_agent, MAX_HASH_INPUT_LEN);
        let hash = {
            let mut cache = self.cache.lock().unwrap();
            if let Some(hash) = cache.get(capped) {
                *hash
            } else {
                let hash = fnv1a(capped.as_bytes());
                cache.put(capped.to_string(), hash);
                hash
            }
        };
        format!("{ip}:{hash:016x}")
    }
}

impl Default for IdentityHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_ip_and_agent_yields_same_identity() {
        let hasher = IdentityHasher::new();
        let a = hasher.derive("10.0.0.1", "curl/8.0");
        let b = hasher.derive("10.0.0.1", "curl/8.0");
        assert_eq!(a, b);
    }

    #[test]
    fn different_agents_same_ip_spread_across_keys() {
        let hasher = IdentityHasher::new();
        let a = hasher.derive("10.0.0.1", "curl/8.0");
        let b = hasher.derive("10.0.0.1", "Mozilla/5.0 (different)");
        assert_ne!(a, b);
    }

    #[test]
    fn oversized_user_agent_is_capped_before_hashing() {
        let hasher = IdentityHasher::new();
        let short = "x".repeat(MAX_HASH_INPUT_LEN);
        let long = "x".repeat(MAX_HASH_INPUT_LEN + 50);
        assert_eq!(hasher.derive("10.0.0.1", &short), hasher.derive("10.0.0.1", &long));
    }

    #[test]
    fn lru_evicts_oldest_entry_past_capacity() {
        let hasher = IdentityHasher::with_capacity(2);
        hasher.derive("1.1.1.1", "agent-a");
        hasher.derive("1.1.1.1", "agent-b");
        hasher.derive("1.1.1.1", "agent-c");
        assert_eq!(hasher.cache.lock().unwrap().len(), 2);
    }
}
