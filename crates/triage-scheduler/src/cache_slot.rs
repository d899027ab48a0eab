//! The single bounded cache (§3 `CacheEntry`, §4.F step 2/9) is shared
//! between two use sites: advice memoized by fingerprint, and a short-lived
//! staging area for the full `(ErrorRecord, context)` pair under the key
//! `error_full_<signatureId>`, so the admitted [`crate::QueueTask`] itself
//! only ever carries the fingerprint and a bounded-size signature.

use std::time::Instant;
use triage_core::{Advice, ErrorRecord};

#[derive(Debug, Clone)]
pub enum CacheSlot {
    /// Memoized advice for a fingerprint; cache hits on this variant short-circuit
    /// the provider entirely (§4.F admission step 9).
    Advice(Advice),
    /// The full error and context staged under `error_full_<signatureId>` while a
    /// task is queued (§3 `QueueTask`). May be evicted before the worker runs it.
    Staged {
        record: ErrorRecord,
        context: String,
        #[allow(dead_code)]
        staged_at: Instant,
    },
}

pub fn staged_key(signature_id: &str) -> String {
    format!("error_full_{signature_id}")
}
