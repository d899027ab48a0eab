//! Log-payload sanitization (§6): a pure, pluggable redaction pass applied
//! by the log sink before persistence, never by the pipeline itself — the
//! pipeline only ever emits the unredacted record to the structured log
//! through a [`Sanitizer`], and the concrete sink decides when to call it.
//!
//! Redacts credit-card-like digit runs, SSN-like patterns, key/value pairs
//! whose key looks like a credential, emails, and phone numbers. Recursion
//! is capped at a configurable depth and arrays at a configurable length to
//! bound CPU on adversarially deep or wide context blobs.

use serde_json::Value;

const DEFAULT_MAX_DEPTH: usize = 3;
const DEFAULT_MAX_ARRAY: usize = 50;
const REDACTED: &str = "[REDACTED]";

/// Anything that can redact a JSON value before it reaches a log sink.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, value: &Value) -> Value;
}

/// The default pattern-based sanitizer described in §6.
#[derive(Clone)]
pub struct DefaultSanitizer {
    max_depth: usize,
    max_array: usize,
    credit_card: regex::Regex,
    ssn: regex::Regex,
    email: regex::Regex,
    phone: regex::Regex,
    sensitive_key: regex::Regex,
}

impl Default for DefaultSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH, DEFAULT_MAX_ARRAY)
    }
}

impl DefaultSanitizer {
    pub fn new(max_depth: usize, max_array: usize) -> Self {
        Self {
            max_depth,
            max_array,
            credit_card: regex::Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap(),
            ssn: regex::Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
            email: regex::Regex::new(r"\b[\w.+-]+@[\w-]+\.[\w.-]+\b").unwrap(),
            phone: regex::Regex::new(r"\b(?:\+?1[ -]?)?\(?\d{3}\)?[ -]?\d{3}[ -]?\d{4}\b").unwrap(),
            sensitive_key: regex::Regex::new(r"(?i)password|token|secret|api_key|credential").unwrap(),
        }
    }

    fn redact_string(&self, s: &str) -> String {
        let s = self.credit_card.replace_all(s, REDACTED);
        let s = self.ssn.replace_all(&s, REDACTED);
        let s = self.email.replace_all(&s, REDACTED);
        let s = self.phone.replace_all(&s, REDACTED);
        s.into_owned()
    }

    fn walk(&self, value: &Value, depth: usize) -> Value {
        if depth >= self.max_depth {
            return match value {
                Value::Object(_) | Value::Array(_) => Value::String("[TRUNCATED]".to_string()),
                Value::String(s) => Value::String(self.redact_string(s)),
                other => other.clone(),
            };
        }
        match value {
            Value::String(s) => Value::String(self.redact_string(s)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .take(self.max_array)
                    .map(|v| self.walk(v, depth + 1))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    let redacted = if self.sensitive_key.is_match(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        self.walk(v, depth + 1)
                    };
                    out.insert(k.clone(), redacted);
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }
}

impl Sanitizer for DefaultSanitizer {
    fn sanitize(&self, value: &Value) -> Value {
        self.walk(value, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_keys_regardless_of_value() {
        let sanitizer = DefaultSanitizer::default();
        let input = json!({"api_key": "sk-live-abc123", "name": "ok"});
        let out = sanitizer.sanitize(&input);
        assert_eq!(out["api_key"], json!("[REDACTED]"));
        assert_eq!(out["name"], json!("ok"));
    }

    #[test]
    fn redacts_email_and_credit_card_like_strings() {
        let sanitizer = DefaultSanitizer::default();
        let input = json!({"message": "contact jane@example.com, card 4111 1111 1111 1111"});
        let out = sanitizer.sanitize(&input);
        let message = out["message"].as_str().unwrap();
        assert!(!message.contains("jane@example.com"));
        assert!(!message.contains("4111"));
    }

    #[test]
    fn caps_recursion_depth() {
        let sanitizer = DefaultSanitizer::new(1, 50);
        let input = json!({"a": {"b": {"c": "jane@example.com"}}});
        let out = sanitizer.sanitize(&input);
        assert_eq!(out["a"], json!("[TRUNCATED]"));
    }

    #[test]
    fn caps_array_length() {
        let sanitizer = DefaultSanitizer::new(3, 2);
        let input = json!({"items": [1, 2, 3, 4, 5]});
        let out = sanitizer.sanitize(&input);
        assert_eq!(out["items"].as_array().unwrap().len(), 2);
    }
}
