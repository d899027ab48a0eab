//! Provider-abstraction errors. All of these resolve to `Advice::Empty`
//! (never propagated as a hard failure) — the scheduler logs and moves on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {0} is not registered")]
    UnknownProvider(String),
    #[error("no credentials configured for provider {0}")]
    MissingCredentials(String),
    #[error("transport error calling provider {0}: {1}")]
    Transport(String, String),
    #[error("provider {0} returned malformed advice")]
    MalformedAdvice(String),
}
