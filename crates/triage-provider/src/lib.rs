//! Model-provider abstraction (§4.D): a single `Analyze(prompt) → advice`
//! contract over multiple remote model providers, so switching providers is
//! a configuration change, never a call-site change.

pub mod error;
pub mod gemini;
pub mod openai;
pub mod registry;

pub use error::ProviderError;
pub use registry::{ModelLimits, ProviderRegistry};

use async_trait::async_trait;
use triage_core::Advice;

/// A single declared model and its limits, registered under a provider.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Unified contract every provider implements. Callers never see
/// provider-specific request/response shapes — only this one method.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Analyzes `prompt` and returns structured advice, or `None` on
    /// malformed output or upstream failure (the scheduler handles `None`
    /// gracefully — this method itself never returns an `Err` that the
    /// scheduler would need special-case handling for beyond logging).
    async fn analyze(&self, prompt: &str) -> Option<Advice>;

    /// The provider's registered name (e.g. `"openai"`, `"gemini"`).
    fn name(&self) -> &str;
}

/// Builds the system/user instruction that asks the model to return a JSON
/// object with an `advice` field (§6 "Provider request").
pub fn analysis_prompt(error_name: &str, message: &str, stack: &str, context: &str) -> String {
    format!(
        "You are an error-triage assistant. Respond with a single JSON object \
         containing an \"advice\" field describing the likely root cause and a \
         remediation for the following error. Do not include any text outside \
         the JSON object.\n\n\
         error: {error_name}\nmessage: {message}\nstack:\n{stack}\ncontext: {context}"
    )
}

/// Parses a provider's raw text response into [`Advice`]. Accepts either a
/// JSON object (wrapped as [`Advice::Structured`]) or a bare JSON string
/// (wrapped as [`Advice::Raw`]); anything else is [`Advice::Empty`] (§6:
/// "the core's parser accepts either a JSON string or an object; anything
/// else yields null").
pub fn parse_advice(raw: &str) -> Advice {
    let trimmed = raw.trim();
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(mut map)) => match map.remove("advice") {
            Some(serde_json::Value::Object(advice)) => Advice::Structured(advice),
            Some(serde_json::Value::String(advice)) => Advice::Raw(advice),
            _ if !map.is_empty() => Advice::Structured(map),
            _ => Advice::Empty,
        },
        Ok(serde_json::Value::String(s)) => Advice::Raw(s),
        _ => Advice::Empty,
    }
}
