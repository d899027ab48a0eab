//! Per-endpoint rate-limit policy table (§4.G). A mapping from endpoint path
//! to `{windowMs, max}`, with a default policy for paths not in the table.
//! Editable at runtime behind a lock, since policies are meant to be tuned
//! without a process restart.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// A single endpoint's rate-limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub window: Duration,
    pub max: u64,
}

impl Policy {
    pub const fn new(window: Duration, max: u64) -> Self {
        Self { window, max }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max: 100,
        }
    }
}

/// Runtime-editable endpoint → policy table.
pub struct PolicyTable {
    default: Policy,
    overrides: RwLock<HashMap<String, Policy>>,
}

impl PolicyTable {
    pub fn new(default: Policy) -> Self {
        Self {
            default,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the policy for `endpoint`, falling back to the default.
    pub fn resolve(&self, endpoint: &str) -> Policy {
        self.overrides
            .read()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or(self.default)
    }

    /// Installs or replaces the policy for `endpoint`.
    pub fn set(&self, endpoint: impl Into<String>, policy: Policy) {
        self.overrides.write().unwrap().insert(endpoint.into(), policy);
    }

    /// Removes an endpoint-specific policy, reverting it to the default.
    pub fn remove(&self, endpoint: &str) {
        self.overrides.write().unwrap().remove(endpoint);
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}
