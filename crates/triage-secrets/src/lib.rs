//! Secrets store: authenticated encryption at rest for provider credentials,
//! with PBKDF2 key derivation, rotation with backup retention, and
//! environment-variable fallback (§4.E).
//!
//! ```
//! use triage_secrets::SecretsStore;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let dir = tempfile::tempdir()?;
//! let store = SecretsStore::builder()
//!     .passphrase("correct horse battery staple!!")
//!     .path(dir.path().join("secrets.json"))
//!     .build()?;
//!
//! store.store("openai", "sk-example")?;
//! assert_eq!(store.get("openai")?.as_deref(), Some("sk-example"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod store;

pub use error::{Result, SecretsError};
pub use store::StoredKey;

use std::path::PathBuf;
use std::sync::Mutex;

use store::FileStore;

const DEFAULT_BACKUP_RETENTION: usize = 3;

/// Metadata about a stored key, returned by [`SecretsStore::metadata`].
#[derive(Debug, Clone)]
pub struct KeyMetadata {
    pub version: u32,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    pub days_until_expiry: Option<i64>,
}

impl From<&StoredKey> for KeyMetadata {
    fn from(key: &StoredKey) -> Self {
        Self {
            version: key.version,
            created_at: key.created_at,
            expires_at: key.expires_at,
            days_until_expiry: key.days_until_expiry(),
        }
    }
}

/// Builder for [`SecretsStore`].
pub struct SecretsStoreBuilder {
    passphrase: Option<String>,
    path: PathBuf,
    pbkdf2_iterations: u32,
    backup_retention: usize,
}

impl Default for SecretsStoreBuilder {
    fn default() -> Self {
        Self {
            passphrase: None,
            path: PathBuf::from("./secrets.json"),
            pbkdf2_iterations: crypto::DEFAULT_PBKDF2_ITERATIONS,
            backup_retention: DEFAULT_BACKUP_RETENTION,
        }
    }
}

impl SecretsStoreBuilder {
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Overrides the PBKDF2 iteration count; clamped to a 200,000 floor
    /// regardless of the caller's value (spec requires ≥200,000, configurable
    /// upward only).
    pub fn pbkdf2_iterations(mut self, iterations: u32) -> Self {
        self.pbkdf2_iterations = iterations.max(200_000);
        self
    }

    pub fn backup_retention(mut self, keep: usize) -> Self {
        self.backup_retention = keep;
        self
    }

    /// Builds the store. If no passphrase was configured, generates an
    /// ephemeral one, warns loudly, and persists it to a restricted
    /// (owner-only) file next to the secrets document so process restarts
    /// within the same run don't silently rotate every stored key.
    pub fn build(self) -> Result<SecretsStore> {
        let passphrase = match self.passphrase {
            Some(p) => {
                config::validate(&p)?;
                p
            }
            None => {
                let ephemeral_path = self.path.with_extension("passphrase");
                match std::fs::read_to_string(&ephemeral_path) {
                    Ok(existing) if config::validate(existing.trim()).is_ok() => existing.trim().to_string(),
                    _ => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            "no ENCRYPTION_KEY configured — generating an ephemeral passphrase; \
                             credentials will not survive a fresh deploy without this file"
                        );
                        let generated = config::generate_ephemeral();
                        if let Some(parent) = ephemeral_path.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        std::fs::write(&ephemeral_path, &generated)?;
                        #[cfg(unix)]
                        {
                            use std::os::unix::fs::PermissionsExt;
                            std::fs::set_permissions(&ephemeral_path, std::fs::Permissions::from_mode(0o600))?;
                        }
                        generated
                    }
                }
            }
        };

        Ok(SecretsStore {
            file: FileStore::new(self.path),
            passphrase: Mutex::new(passphrase),
            pbkdf2_iterations: self.pbkdf2_iterations,
            backup_retention: self.backup_retention,
        })
    }
}

/// Authenticated-encryption secrets store for provider credentials.
///
/// A missing key returns `Ok(None)`, never an error; decryption failures are
/// the one case that surfaces a hard [`SecretsError`] (§7 `DecryptFailure`).
pub struct SecretsStore {
    file: FileStore,
    passphrase: Mutex<String>,
    pbkdf2_iterations: u32,
    backup_retention: usize,
}

impl SecretsStore {
    pub fn builder() -> SecretsStoreBuilder {
        SecretsStoreBuilder::default()
    }

    /// Stores `plaintext` under `provider`, encrypting it at rest.
    pub fn store(&self, provider: &str, plaintext: &str) -> Result<KeyMetadata> {
        let passphrase = self.passphrase.lock().unwrap().clone();
        let key = self
            .file
            .store(&passphrase, provider, plaintext, self.pbkdf2_iterations)?;
        Ok(KeyMetadata::from(&key))
    }

    /// Returns the plaintext credential for `provider`, if any.
    ///
    /// Falls back to the `<PROVIDER>_API_KEY`-shaped environment variable
    /// (uppercased, non-alphanumerics replaced with `_`) when no key has
    /// ever been stored — this fallback has no rotation path.
    pub fn get(&self, provider: &str) -> Result<Option<String>> {
        let passphrase = self.passphrase.lock().unwrap().clone();
        if let Some(plaintext) = self.file.get(&passphrase, provider)? {
            return Ok(Some(plaintext));
        }
        Ok(std::env::var(env_var_name(provider)).ok())
    }

    /// Rotates `provider`'s credential to `new_key`, archiving the previous
    /// record and keeping only the last `backup_retention` backups.
    pub fn rotate(&self, provider: &str, new_key: &str) -> Result<KeyMetadata> {
        let passphrase = self.passphrase.lock().unwrap().clone();
        let key = self.file.rotate(
            &passphrase,
            provider,
            new_key,
            self.pbkdf2_iterations,
            self.backup_retention,
        )?;
        Ok(KeyMetadata::from(&key))
    }

    /// Returns metadata for `provider`'s stored key, if any (not the environment fallback).
    pub fn metadata(&self, provider: &str) -> Result<Option<KeyMetadata>> {
        Ok(self.file.metadata(provider)?.map(|k| KeyMetadata::from(&k)))
    }
}

fn env_var_name(provider: &str) -> String {
    let upper: String = provider
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{upper}_API_KEY")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pbkdf2_iterations_floor_at_200_000() {
        let builder = SecretsStoreBuilder::default().pbkdf2_iterations(1_000);
        assert_eq!(builder.pbkdf2_iterations, 200_000);

        let builder = SecretsStoreBuilder::default().pbkdf2_iterations(500_000);
        assert_eq!(builder.pbkdf2_iterations, 500_000);
    }

    #[test]
    fn store_and_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretsStore::builder()
            .passphrase("correct horse battery staple!!")
            .path(dir.path().join("secrets.json"))
            .build()
            .unwrap();

        store.store("openai", "sk-example").unwrap();
        assert_eq!(store.get("openai").unwrap().as_deref(), Some("sk-example"));
    }

    #[test]
    fn missing_key_falls_back_to_env() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretsStore::builder()
            .passphrase("correct horse battery staple!!")
            .path(dir.path().join("secrets.json"))
            .build()
            .unwrap();

        unsafe {
            std::env::set_var("TESTPROVIDER_API_KEY", "from-env");
        }
        assert_eq!(
            store.get("testprovider").unwrap().as_deref(),
            Some("from-env")
        );
        unsafe {
            std::env::remove_var("TESTPROVIDER_API_KEY");
        }
    }

    #[test]
    fn missing_key_without_env_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretsStore::builder()
            .passphrase("correct horse battery staple!!")
            .path(dir.path().join("secrets.json"))
            .build()
            .unwrap();
        assert!(store.get("nonexistent-provider-xyz").unwrap().is_none());
    }

    #[test]
    fn rotation_keeps_bounded_backups() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretsStore::builder()
            .passphrase("correct horse battery staple!!")
            .path(dir.path().join("secrets.json"))
            .backup_retention(2)
            .build()
            .unwrap();

        store.store("openai", "key-v1").unwrap();
        for i in 2..6 {
            std::thread::sleep(std::time::Duration::from_millis(1100));
            store.rotate("openai", &format!("key-v{i}")).unwrap();
        }

        let doc = store.file.load().unwrap();
        let backups = doc
            .keys
            .keys()
            .filter(|k| k.starts_with("openai_backup_"))
            .count();
        assert!(backups <= 2, "expected at most 2 backups, found {backups}");
        assert_eq!(store.get("openai").unwrap().as_deref(), Some("key-v5"));
    }

    #[test]
    fn builder_rejects_weak_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let result = SecretsStore::builder()
            .passphrase("short")
            .path(dir.path().join("secrets.json"))
            .build();
        assert!(result.is_err());
    }
}
