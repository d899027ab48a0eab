//! In-process error-analysis middleware.
//!
//! Intercepts application errors, responds to the caller immediately, and
//! schedules a best-effort, cached, memory-pressure-aware background call to
//! an AI model provider to produce root-cause advice — without ever blocking
//! the request path on that call.
//!
//! The pipeline composes seven subsystems, each its own crate:
//!
//! - [`triage_memory`] — a memory-pressure monitor driving adaptive backpressure.
//! - [`triage_cache`] — the bounded LRU/TTL cache backing advice memoization.
//! - [`triage_retry`] — the retrying, connection-pooled HTTP client used by providers.
//! - [`triage_provider`] — the `Provider` abstraction over model backends (OpenAI/Gemini-shaped).
//! - [`triage_secrets`] — authenticated-encryption-at-rest credential storage.
//! - [`triage_scheduler`] — the admission-controlled analysis queue and worker pool.
//! - [`triage_ratelimiter`] — identity- and endpoint-aware rate limiting.
//!
//! [`ErrorPipeline`] assembles all seven behind the single `Handle`-shaped
//! entry point a host integration calls on every application error. `triage`
//! itself depends on no web framework — [`Responder`] is the seam a host
//! adapter implements (see `demos/axum-error-pipeline` for one over Axum).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use triage::{Config, ErrorPipeline, RawError, Responder};
//! use triage_core::ErrorRecord;
//! use triage_provider::ProviderRegistry;
//! use triage_secrets::SecretsStore;
//!
//! struct NoopResponder;
//! impl Responder for NoopResponder {
//!     fn headers_sent(&self) -> bool { false }
//!     fn prefers_html(&self) -> bool { false }
//!     fn write_html(&mut self, _status_code: u16, _message: &str, _stack: &str) {}
//!     fn write_json(&mut self, _status_code: u16, _record: &ErrorRecord) {}
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let secrets = Arc::new(SecretsStore::builder().passphrase("correct horse battery staple!!").build()?);
//! let pipeline = ErrorPipeline::new(Config::from_env(), ProviderRegistry::new(), secrets)?;
//!
//! pipeline.handle::<NoopResponder>(
//!     Some(RawError::new("TypeError", "cannot read property of undefined")),
//!     None,
//!     None::<fn(&ErrorRecord)>,
//! );
//! # Ok(())
//! # }
//! ```

mod config;
mod pipeline;
mod responder;
mod sanitize;

pub use config::Config;
pub use pipeline::{ErrorPipeline, LogRecord, RawError};
pub use responder::{html_escape, Responder};
pub use sanitize::{DefaultSanitizer, Sanitizer};

pub use triage_cache as cache;
pub use triage_core as core;
pub use triage_memory as memory;
pub use triage_provider as provider;
pub use triage_ratelimiter as ratelimiter;
pub use triage_retry as retry;
pub use triage_scheduler as scheduler;
pub use triage_secrets as secrets;
