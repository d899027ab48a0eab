//! `triage::Config` (§6 ambient addition): reads every environment variable
//! in spec.md §6's table, parses with validation, and clamps every limit to
//! `SAFE_THRESHOLD`. Loading `.env` files is explicitly the bootstrap/CLI's
//! job (spec.md §1's out-of-scope list) — this reads `std::env` directly.
//!
//! Each clamp is logged at most once per process per field (§8: "values
//! above `SAFE_THRESHOLD` are clamped and logged exactly once per process"),
//! mirroring the same `OnceLock<Mutex<HashSet<&str>>>` pattern
//! `triage-scheduler` and `triage-retry` use for their own env-derived
//! limits.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// Parsed, clamped configuration for the whole pipeline (§6).
#[derive(Debug, Clone)]
pub struct Config {
    pub concurrency: usize,
    pub queue_limit: usize,
    pub safe_threshold: usize,
    pub cache_limit: usize,
    pub cache_ttl: Duration,
    pub http_timeout: Duration,
    pub retry_attempts: usize,
    pub retry_base: Duration,
    /// `None` means uncapped (`RETRY_MAX_MS=0`).
    pub retry_max: Option<Duration>,
    pub max_sockets: usize,
    pub max_free_sockets: usize,
    /// `None` disables scheduler metrics (`METRIC_INTERVAL_MS=0`).
    pub metric_interval: Option<Duration>,
    /// Secrets-store passphrase (`ENCRYPTION_KEY`). `None` makes the store
    /// generate and persist an ephemeral one, per spec.md §4.E.
    pub encryption_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 5,
            queue_limit: 100,
            safe_threshold: 1000,
            cache_limit: 0,
            cache_ttl: Duration::from_secs(0),
            http_timeout: Duration::from_millis(10_000),
            retry_attempts: 2,
            retry_base: Duration::from_millis(100),
            retry_max: None,
            max_sockets: 50,
            max_free_sockets: 10,
            metric_interval: None,
            encryption_key: None,
        }
    }
}

impl Config {
    /// Reads every §6 environment variable, applying spec defaults for any
    /// that are absent or fail to parse, then clamps limits to
    /// `SAFE_THRESHOLD`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let safe_threshold = env_usize("SAFE_THRESHOLD", defaults.safe_threshold);

        let mut cfg = Self {
            concurrency: clamp_usize(
                "CONCURRENCY",
                env_usize("CONCURRENCY", defaults.concurrency),
                safe_threshold,
            ),
            queue_limit: clamp_usize(
                "QUEUE_LIMIT",
                env_usize("QUEUE_LIMIT", defaults.queue_limit),
                safe_threshold,
            ),
            safe_threshold,
            cache_limit: clamp_usize(
                "CACHE_LIMIT",
                env_usize("CACHE_LIMIT", defaults.cache_limit),
                safe_threshold,
            ),
            cache_ttl: Duration::from_secs(env_u64("CACHE_TTL", defaults.cache_ttl.as_secs())),
            http_timeout: Duration::from_millis(env_u64(
                "HTTP_TIMEOUT_MS",
                defaults.http_timeout.as_millis() as u64,
            )),
            retry_attempts: clamp_usize(
                "RETRY_ATTEMPTS",
                env_usize("RETRY_ATTEMPTS", defaults.retry_attempts),
                safe_threshold,
            ),
            retry_base: Duration::from_millis(env_u64(
                "RETRY_BASE_MS",
                defaults.retry_base.as_millis() as u64,
            )),
            retry_max: match env_u64("RETRY_MAX_MS", 0) {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            max_sockets: clamp_usize(
                "MAX_SOCKETS",
                env_usize("MAX_SOCKETS", defaults.max_sockets),
                safe_threshold,
            ),
            max_free_sockets: clamp_usize(
                "MAX_FREE_SOCKETS",
                env_usize("MAX_FREE_SOCKETS", defaults.max_free_sockets),
                safe_threshold,
            ),
            metric_interval: match env_u64("METRIC_INTERVAL_MS", 0) {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            encryption_key: std::env::var("ENCRYPTION_KEY").ok(),
        };

        // Belt-and-suspenders: `max_free_sockets` never exceeds `max_sockets`.
        if cfg.max_free_sockets > cfg.max_sockets {
            cfg.max_free_sockets = cfg.max_sockets;
        }
        cfg
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

static CLAMP_LOGGED: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();

fn clamp_usize(field: &'static str, value: usize, safe_threshold: usize) -> usize {
    if value <= safe_threshold {
        return value;
    }
    let set = CLAMP_LOGGED.get_or_init(|| Mutex::new(HashSet::new()));
    if set.lock().unwrap().insert(field) {
        #[cfg(feature = "tracing")]
        tracing::warn!(field, value, safe_threshold, "config value clamped to safe threshold");
    }
    safe_threshold
}
