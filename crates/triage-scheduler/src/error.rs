//! Error types for the analysis scheduler.

pub use triage_core::RejectReason;

/// Re-exported so callers rejected at admission don't need a separate import
/// to match on why (§4.F: `Schedule(err, ctx) → future(advice) | Rejected{reason}`).
pub type Result<T> = std::result::Result<T, RejectReason>;
