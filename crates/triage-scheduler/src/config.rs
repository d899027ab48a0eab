//! Configuration for the analysis scheduler (§4.F, §6 environment table).

use std::time::Duration;

/// Hard cap checked after the pressure-derived limit (§4.F step 7; §9 open
/// question — this implementation checks `dynLimit` first and `ABSOLUTE_MAX`
/// second, literally following the spec's step ordering, so a `queue_limit`
/// configured above 200 at Low pressure is preempted by the absolute cap).
pub const DEFAULT_ABSOLUTE_MAX: usize = 200;

/// Signature size above which, under Critical pressure only, a task is
/// rejected as `TooLarge` rather than admitted (§4.F step 8).
pub const TOO_LARGE_BYTES: usize = 10 * 1024;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrency limit `C`: at most this many tasks in `active` simultaneously.
    pub(crate) concurrency: usize,
    /// Queue capacity `Q` at Low pressure; scaled down by [`triage_core::PressureLevel::queue_fraction`]
    /// at higher pressure levels.
    pub(crate) queue_limit: usize,
    /// Upper clamp applied to `concurrency` and `queue_limit` at construction.
    pub(crate) safe_threshold: usize,
    /// Hard cap on `active + pending` regardless of pressure.
    pub(crate) absolute_max: usize,
    /// `None` disables periodic metrics emission (`METRIC_INTERVAL_MS=0`).
    pub(crate) metric_interval: Option<Duration>,
    /// Deadline applied from `enqueued_at`; exceeding it resolves the task as
    /// `Rejected{Timeout}` without consuming a provider call.
    pub(crate) max_task_age: Duration,
    /// Grace period `Shutdown()` allows in-flight tasks before they are
    /// treated as abandoned.
    pub(crate) shutdown_grace: Duration,
    pub(crate) name: String,
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn queue_limit(&self) -> usize {
        self.queue_limit
    }

    pub fn absolute_max(&self) -> usize {
        self.absolute_max
    }
}

pub struct SchedulerConfigBuilder {
    concurrency: usize,
    queue_limit: usize,
    safe_threshold: usize,
    absolute_max: usize,
    metric_interval: Option<Duration>,
    max_task_age: Duration,
    shutdown_grace: Duration,
    name: String,
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfigBuilder {
    /// Defaults mirror the §6 environment table: `CONCURRENCY=5`,
    /// `QUEUE_LIMIT=100`, `SAFE_THRESHOLD=1000`, absolute max 200, metrics
    /// off, and a max task age of the HTTP timeout times (retries + 2).
    pub fn new() -> Self {
        Self {
            concurrency: 5,
            queue_limit: 100,
            safe_threshold: 1000,
            absolute_max: DEFAULT_ABSOLUTE_MAX,
            metric_interval: None,
            max_task_age: Duration::from_millis(10_000 * 4),
            shutdown_grace: Duration::from_secs(30),
            name: "analysis-scheduler".to_string(),
        }
    }

    pub fn concurrency(mut self, c: usize) -> Self {
        self.concurrency = c;
        self
    }

    pub fn queue_limit(mut self, q: usize) -> Self {
        self.queue_limit = q;
        self
    }

    pub fn safe_threshold(mut self, t: usize) -> Self {
        self.safe_threshold = t;
        self
    }

    pub fn absolute_max(mut self, m: usize) -> Self {
        self.absolute_max = m;
        self
    }

    pub fn metric_interval(mut self, interval: Option<Duration>) -> Self {
        self.metric_interval = interval;
        self
    }

    pub fn max_task_age(mut self, age: Duration) -> Self {
        self.max_task_age = age;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Clamps `concurrency` and `queue_limit` to `safe_threshold`, logging
    /// once per process per field if a clamp occurred (§8: "values above
    /// `SAFE_THRESHOLD` are clamped and logged exactly once per process").
    pub fn build(self) -> SchedulerConfig {
        let mut concurrency = self.concurrency;
        let mut queue_limit = self.queue_limit;
        if concurrency > self.safe_threshold {
            concurrency = self.safe_threshold;
            log_clamp_once("CONCURRENCY");
        }
        if queue_limit > self.safe_threshold {
            queue_limit = self.safe_threshold;
            log_clamp_once("QUEUE_LIMIT");
        }
        SchedulerConfig {
            concurrency,
            queue_limit,
            safe_threshold: self.safe_threshold,
            absolute_max: self.absolute_max,
            metric_interval: self.metric_interval,
            max_task_age: self.max_task_age,
            shutdown_grace: self.shutdown_grace,
            name: self.name,
        }
    }
}

static CLAMP_LOGGED: std::sync::OnceLock<std::sync::Mutex<std::collections::HashSet<&'static str>>> =
    std::sync::OnceLock::new();

fn log_clamp_once(field: &'static str) {
    let set = CLAMP_LOGGED.get_or_init(|| std::sync::Mutex::new(std::collections::HashSet::new()));
    let mut set = set.lock().unwrap();
    if set.insert(field) {
        #[cfg(feature = "tracing")]
        tracing::warn!(field, "configuration value clamped to safe threshold");
    }
}
