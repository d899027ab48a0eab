//! Core infrastructure for the triage error-analysis pipeline.
//!
//! This crate provides shared functionality used across every pipeline module:
//! - an event bus for observability ([`events`]),
//! - a unified error-composition helper ([`error`]),
//! - memory-pressure classification shared by the scheduler, cache, and rate
//!   limiter ([`pressure`]),
//! - the error/fingerprint/advice domain model ([`model`]),
//! - the error-kind taxonomy surfaced to callers and logs ([`kinds`]).

pub mod error;
pub mod events;
pub mod kinds;
pub mod model;
pub mod pressure;

pub use error::ResilienceError;
pub use events::{EventListener, EventListeners, FnListener, ResilienceEvent};
pub use kinds::{ErrorKind, RejectReason};
pub use model::{Advice, ErrorRecord, ErrorSignature, Fingerprint, QueueTask};
pub use pressure::PressureLevel;
