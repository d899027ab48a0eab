//! On-disk layout: a single JSON document at a configured path, 0600
//! permissions, directory created 0700 if absent (§6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::{self, Sealed};
use crate::error::{Result, SecretsError};

/// A single encrypted credential record (§3 `StoredKey`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKey {
    pub key_id: String,
    pub version: u32,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub iv: Vec<u8>,
    pub algorithm: String,
    pub iterations: u32,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    pub rotated_at: Option<u64>,
}

impl StoredKey {
    fn new(key_id: &str, sealed: &Sealed, version: u32) -> Self {
        Self {
            key_id: key_id.to_string(),
            version,
            ciphertext: sealed.ciphertext.clone(),
            salt: sealed.salt.to_vec(),
            iv: sealed.iv.to_vec(),
            algorithm: "AES-256-GCM+PBKDF2-HMAC-SHA256".to_string(),
            iterations: sealed.iterations,
            created_at: now(),
            expires_at: None,
            rotated_at: None,
        }
    }

    fn sealed(&self) -> Result<Sealed> {
        let salt: [u8; crypto::SALT_LEN] = self
            .salt
            .clone()
            .try_into()
            .map_err(|_| SecretsError::Decrypt {
                provider: self.key_id.clone(),
            })?;
        let iv: [u8; crypto::IV_LEN] = self
            .iv
            .clone()
            .try_into()
            .map_err(|_| SecretsError::Decrypt {
                provider: self.key_id.clone(),
            })?;
        Ok(Sealed {
            ciphertext: self.ciphertext.clone(),
            salt,
            iv,
            iterations: self.iterations,
        })
    }

    /// Days until expiry, if this record has an expiry set.
    pub fn days_until_expiry(&self) -> Option<i64> {
        self.expires_at.map(|exp| {
            let now = now() as i64;
            (exp as i64 - now) / 86_400
        })
    }
}

/// `{keys: {<keyId>: StoredKey}, metadata: {version, createdAt, lastUpdated}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub keys: HashMap<String, StoredKey>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub version: Option<u32>,
    pub created_at: Option<u64>,
    pub last_updated: Option<u64>,
}

/// Loads, mutates, and persists the single on-disk secrets document.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Document> {
        if !self.path.exists() {
            return Ok(Document::default());
        }
        let bytes = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, doc: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
            set_permissions(parent, 0o700)?;
        }
        let bytes = serde_json::to_vec_pretty(doc)?;
        std::fs::write(&self.path, bytes)?;
        set_permissions(&self.path, 0o600)?;
        Ok(())
    }

    pub fn store(&self, passphrase: &str, provider: &str, plaintext: &str, iterations: u32) -> Result<StoredKey> {
        let mut doc = self.load()?;
        let sealed = crypto::seal(passphrase, provider, plaintext, iterations);
        let key = StoredKey::new(provider, &sealed, 1);
        doc.keys.insert(provider.to_string(), key.clone());
        touch(&mut doc);
        self.save(&doc)?;
        Ok(key)
    }

    pub fn get(&self, passphrase: &str, provider: &str) -> Result<Option<String>> {
        let doc = self.load()?;
        match doc.keys.get(provider) {
            Some(key) => {
                let sealed = key.sealed()?;
                Ok(Some(crypto::open(passphrase, provider, &sealed, provider)?))
            }
            None => Ok(None),
        }
    }

    pub fn metadata(&self, provider: &str) -> Result<Option<StoredKey>> {
        let doc = self.load()?;
        Ok(doc.keys.get(provider).cloned())
    }

    /// Rotates `provider`'s key to `new_key`, archiving the previous record
    /// as `<provider>_backup_<ts>` and retaining only the last `keep_backups`.
    pub fn rotate(
        &self,
        passphrase: &str,
        provider: &str,
        new_key: &str,
        iterations: u32,
        keep_backups: usize,
    ) -> Result<StoredKey> {
        let mut doc = self.load()?;

        if let Some(mut previous) = doc.keys.get(provider).cloned() {
            previous.rotated_at = Some(now());
            let backup_id = format!("{provider}_backup_{}", now());
            doc.keys.insert(backup_id, previous);
            prune_backups(&mut doc, provider, keep_backups);
        }

        let sealed = crypto::seal(passphrase, provider, new_key, iterations);
        let next_version = doc
            .keys
            .get(provider)
            .map(|k| k.version + 1)
            .unwrap_or(1);
        let key = StoredKey::new(provider, &sealed, next_version);
        doc.keys.insert(provider.to_string(), key.clone());
        touch(&mut doc);
        self.save(&doc)?;
        Ok(key)
    }
}

fn prune_backups(doc: &mut Document, provider: &str, keep: usize) {
    let prefix = format!("{provider}_backup_");
    let mut backups: Vec<(String, u64)> = doc
        .keys
        .keys()
        .filter(|k| k.starts_with(&prefix))
        .filter_map(|k| {
            k.strip_prefix(&prefix)
                .and_then(|ts| ts.parse::<u64>().ok())
                .map(|ts| (k.clone(), ts))
        })
        .collect();
    backups.sort_by_key(|(_, ts)| std::cmp::Reverse(*ts));
    for (key, _) in backups.into_iter().skip(keep) {
        doc.keys.remove(&key);
    }
}

fn touch(doc: &mut Document) {
    let now = now();
    if doc.metadata.created_at.is_none() {
        doc.metadata.created_at = Some(now);
    }
    doc.metadata.last_updated = Some(now);
    doc.metadata.version = Some(doc.metadata.version.unwrap_or(0) + 1);
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        }
        s.serialize_str(&out)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        if s.len() % 2 != 0 {
            return Err(serde::de::Error::custom("odd-length hex string"));
        }
        let mut out = Vec::with_capacity(s.len() / 2);
        let bytes = s.as_bytes();
        for chunk in bytes.chunks(2) {
            let hi = (chunk[0] as char).to_digit(16).ok_or_else(|| serde::de::Error::custom("invalid hex"))?;
            let lo = (chunk[1] as char).to_digit(16).ok_or_else(|| serde::de::Error::custom("invalid hex"))?;
            out.push(((hi << 4) | lo) as u8);
        }
        Ok(out)
    }
}
