//! Domain types shared across the pipeline: error records, fingerprints, and advice.

use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Structured model output describing remediation for an error.
///
/// Parsed once by the provider abstraction and never re-parsed downstream
/// (see the design note on dynamically-typed advice objects).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Advice {
    /// A well-formed JSON object returned by the model.
    Structured(serde_json_like::Map),
    /// Model output that parsed as JSON but not as an object (e.g. a bare string).
    Raw(String),
    /// No advice could be produced (malformed output or upstream failure).
    Empty,
}

impl Advice {
    pub fn is_empty(&self) -> bool {
        matches!(self, Advice::Empty)
    }
}

#[cfg(feature = "serde")]
mod serde_json_like {
    pub type Map = serde_json::Map<String, serde_json::Value>;
}

#[cfg(not(feature = "serde"))]
mod serde_json_like {
    use std::collections::BTreeMap;
    /// Fallback advice payload representation when the `serde` feature is disabled.
    pub type Map = BTreeMap<String, String>;
}

/// An immutable value describing a single occurrence of an application error.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    /// Opaque identifier, unique per occurrence.
    pub unique_name: String,
    pub error_name: String,
    pub message: String,
    pub status_code: u16,
    pub is_operational: bool,
    /// May be truncated by the caller before constructing the record.
    pub stack_trace: String,
    /// Monotonic + wall clock timestamp (unix millis), set at construction.
    pub timestamp_ms: u128,
    /// Opaque stringified context blob.
    pub context: String,
}

impl ErrorRecord {
    pub fn new(
        error_name: impl Into<String>,
        message: impl Into<String>,
        stack_trace: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            unique_name: new_unique_name(),
            error_name: error_name.into(),
            message: message.into(),
            status_code: 500,
            is_operational: true,
            stack_trace: stack_trace.into(),
            timestamp_ms: now_ms(),
            context: context.into(),
        }
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_operational(mut self, is_operational: bool) -> Self {
        self.is_operational = is_operational;
        self
    }

    /// Derives the stable fingerprint for this record (see [`Fingerprint::compute`]).
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(
            &self.error_name,
            &self.message,
            self.status_code,
            &self.stack_trace,
        )
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

fn new_unique_name() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("err_{:x}_{:x}", now_ms(), seq)
}

/// A stable content-derived identifier used as a cache key and de-duplication
/// primitive. Built over `(errorName, message, code, normalizedStackHead)`.
///
/// Two distinct errors that normalize to the same head will share a
/// fingerprint; see the design note on fingerprint collisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Keeps the first 5 stack frames, strips control characters, and
    /// replaces digit runs with `N` before hashing, so that line numbers and
    /// addresses don't fragment the fingerprint across otherwise-identical
    /// occurrences.
    pub fn compute(error_name: &str, message: &str, status_code: u16, stack_trace: &str) -> Self {
        let normalized_head = normalize_stack_head(stack_trace, 5);

        let mut hasher = Sha256::new();
        hasher.update(error_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(message.as_bytes());
        hasher.update(b"\0");
        hasher.update(status_code.to_be_bytes());
        hasher.update(b"\0");
        hasher.update(normalized_head.as_bytes());
        let digest = hasher.finalize();

        Self(hex_encode(&digest))
    }

    /// Full fingerprint, used as the cache key for advice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated 16 hex char form used as the queue-side task identifier.
    pub fn signature_id(&self) -> &str {
        &self.0[..16]
    }
}

fn normalize_stack_head(stack_trace: &str, max_frames: usize) -> String {
    let mut out = String::new();
    for line in stack_trace.lines().take(max_frames) {
        let cleaned: String = line.chars().filter(|c| !c.is_control()).collect();
        let mut digits_run = false;
        for ch in cleaned.chars() {
            if ch.is_ascii_digit() {
                if !digits_run {
                    out.push('N');
                    digits_run = true;
                }
            } else {
                digits_run = false;
                out.push(ch);
            }
        }
        out.push('\n');
    }
    out
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push(HEX[(b >> 4) as usize] as char);
        s.push(HEX[(b & 0x0f) as usize] as char);
    }
    s
}

/// Trimmed error+context copy small enough to live in the scheduler's queue.
///
/// The full error/context live in the cache under `error_full_<signatureId>`;
/// the queue task only ever carries this bounded-size signature, to keep
/// queue memory bounded independent of the original error size.
#[derive(Debug, Clone)]
pub struct ErrorSignature {
    pub name: String,
    pub message: String,
}

impl ErrorSignature {
    const MAX_MESSAGE: usize = 200;
    const MAX_NAME: usize = 50;

    pub fn from_record(record: &ErrorRecord) -> Self {
        Self {
            name: truncate(&record.error_name, Self::MAX_NAME),
            message: truncate(&record.message, Self::MAX_MESSAGE),
        }
    }

    /// Rough byte-size estimate used for the `TooLarge` admission check.
    pub fn estimated_size(&self) -> usize {
        self.name.len() + self.message.len()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// `{fingerprint, errorSignature, enqueuedAt}` — the unit of work admitted by the scheduler.
#[derive(Debug, Clone)]
pub struct QueueTask {
    pub fingerprint: Fingerprint,
    pub signature: ErrorSignature,
    pub enqueued_at: std::time::Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_across_line_numbers() {
        let a = Fingerprint::compute("TypeError", "boom", 500, "a.rs:10\nb.rs:20");
        let b = Fingerprint::compute("TypeError", "boom", 500, "a.rs:99\nb.rs:41");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_message() {
        let a = Fingerprint::compute("TypeError", "boom", 500, "a.rs:10");
        let b = Fingerprint::compute("TypeError", "bang", 500, "a.rs:10");
        assert_ne!(a, b);
    }

    #[test]
    fn signature_id_is_16_hex_chars() {
        let fp = Fingerprint::compute("E", "m", 500, "s");
        assert_eq!(fp.signature_id().len(), 16);
    }

    #[test]
    fn error_signature_bounds_sizes() {
        let record = ErrorRecord::new("E".repeat(200), "M".repeat(1000), "", "");
        let sig = ErrorSignature::from_record(&record);
        assert!(sig.name.len() <= 50);
        assert!(sig.message.len() <= 200);
    }
}
