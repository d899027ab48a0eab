//! Errors surfaced by the secrets store.

use thiserror::Error;

/// Failures from the secrets store.
///
/// [`SecretsError::Decrypt`] is the sole hard error the pipeline never
/// swallows (§7): it is returned to the key-management API directly rather
/// than degrading to a fallback plaintext.
#[derive(Debug, Error)]
pub enum SecretsError {
    /// Authenticated decryption failed — tampered ciphertext, tag, IV, salt,
    /// or `keyId` (used as AAD). Never returns a plaintext on this path.
    #[error("decryption failed for provider {provider}")]
    Decrypt { provider: String },

    /// The configured passphrase is on the insecure deny-list or shorter
    /// than 16 characters.
    #[error("passphrase rejected: {reason}")]
    WeakPassphrase { reason: String },

    /// The on-disk store could not be read or written.
    #[error("secrets store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk document did not parse as the expected JSON shape.
    #[error("secrets store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SecretsError>;
