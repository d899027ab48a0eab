//! Passphrase policy: deny-list of insecure defaults, minimum length, and
//! ephemeral-passphrase fallback when no passphrase is configured.

use rand::RngCore;

use crate::error::{Result, SecretsError};

pub const MIN_PASSPHRASE_LEN: usize = 16;

const DENY_LIST: &[&str] = &[
    "changeme",
    "password",
    "password123",
    "secret",
    "default",
    "12345678901234567890",
    "insecurepassphrase",
    "your-secret-key-here",
    "encryption_key",
];

/// Validates an operator-supplied passphrase against the deny-list and the
/// minimum length requirement.
pub fn validate(passphrase: &str) -> Result<()> {
    if passphrase.len() < MIN_PASSPHRASE_LEN {
        return Err(SecretsError::WeakPassphrase {
            reason: format!("must be at least {MIN_PASSPHRASE_LEN} characters"),
        });
    }
    let lowered = passphrase.to_lowercase();
    if DENY_LIST.iter().any(|bad| lowered == *bad) {
        return Err(SecretsError::WeakPassphrase {
            reason: "passphrase is on the insecure deny-list".to_string(),
        });
    }
    Ok(())
}

/// Generates a fresh, high-entropy passphrase for the "no passphrase
/// configured" fallback path. Callers must warn loudly and persist this to a
/// restricted-permission file so restarts don't silently rotate every key.
pub fn generate_ephemeral() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(64);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_passphrase() {
        assert!(validate("short").is_err());
    }

    #[test]
    fn rejects_deny_list_entries() {
        assert!(validate("changeme").is_err());
        assert!(validate("CHANGEME").is_err());
    }

    #[test]
    fn accepts_strong_passphrase() {
        assert!(validate("correct horse battery staple!!").is_ok());
    }

    #[test]
    fn ephemeral_passphrase_passes_validation() {
        let generated = generate_ephemeral();
        assert!(validate(&generated).is_ok());
    }
}
