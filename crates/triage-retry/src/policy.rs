//! Retry policy: what to retry, and how long to wait before doing so.

use crate::backoff::IntervalFunction;
use std::sync::Arc;
use std::time::Duration;

/// `Fn(&E) -> bool` deciding whether a given error is retryable.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Combines a backoff strategy with an optional retry predicate.
///
/// Without a predicate, every error is considered retryable (subject to
/// `max_attempts`/budget); callers that need to exclude certain errors
/// (e.g. non-retryable 4xx status codes) set one via
/// [`RetryConfigBuilder::retry_on`](crate::RetryConfigBuilder::retry_on).
pub struct RetryPolicy<E> {
    interval_fn: Arc<dyn IntervalFunction>,
    pub(crate) retry_predicate: Option<RetryPredicate<E>>,
}

impl<E> RetryPolicy<E> {
    pub fn new(interval_fn: Arc<dyn IntervalFunction>) -> Self {
        Self {
            interval_fn,
            retry_predicate: None,
        }
    }

    pub fn should_retry(&self, error: &E) -> bool {
        match &self.retry_predicate {
            Some(predicate) => predicate(error),
            None => true,
        }
    }

    pub fn next_backoff(&self, attempt: usize) -> Duration {
        self.interval_fn.next_interval(attempt)
    }
}
