//! Events emitted by the analysis scheduler (§4.F) for observability.

use std::time::{Duration, Instant};
use triage_core::events::ResilienceEvent;
use triage_core::RejectReason;

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A task was admitted: `pending` was incremented.
    TaskAdmitted {
        pattern_name: String,
        timestamp: Instant,
        active: usize,
        pending: usize,
    },
    /// Admission was declined (§4.F steps 6-8).
    TaskRejected {
        pattern_name: String,
        timestamp: Instant,
        reason: RejectReason,
        pressure: triage_core::PressureLevel,
        dyn_limit: usize,
        active: usize,
        pending: usize,
    },
    /// The cache already held advice for this fingerprint; no queue slot was consumed.
    CacheHit {
        pattern_name: String,
        timestamp: Instant,
    },
    /// A task finished (successfully or with `None` advice) and released its slot.
    TaskCompleted {
        pattern_name: String,
        timestamp: Instant,
        duration: Duration,
        produced_advice: bool,
    },
    /// Periodic metrics tick (§4.F "Metrics").
    MetricsTick {
        pattern_name: String,
        timestamp: Instant,
        queue_length: usize,
        rejects: usize,
        pressure: triage_core::PressureLevel,
        dyn_limit: usize,
    },
}

impl ResilienceEvent for SchedulerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SchedulerEvent::TaskAdmitted { .. } => "task_admitted",
            SchedulerEvent::TaskRejected { .. } => "task_rejected",
            SchedulerEvent::CacheHit { .. } => "cache_hit",
            SchedulerEvent::TaskCompleted { .. } => "task_completed",
            SchedulerEvent::MetricsTick { .. } => "metrics_tick",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            SchedulerEvent::TaskAdmitted { timestamp, .. }
            | SchedulerEvent::TaskRejected { timestamp, .. }
            | SchedulerEvent::CacheHit { timestamp, .. }
            | SchedulerEvent::TaskCompleted { timestamp, .. }
            | SchedulerEvent::MetricsTick { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            SchedulerEvent::TaskAdmitted { pattern_name, .. }
            | SchedulerEvent::TaskRejected { pattern_name, .. }
            | SchedulerEvent::CacheHit { pattern_name, .. }
            | SchedulerEvent::TaskCompleted { pattern_name, .. }
            | SchedulerEvent::MetricsTick { pattern_name, .. } => pattern_name,
        }
    }
}
