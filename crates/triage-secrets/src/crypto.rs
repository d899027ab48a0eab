//! AES-256-GCM authenticated encryption with a PBKDF2-derived content key.
//!
//! Mirrors the `"aes:" + base64(nonce || ciphertext || tag)` packing style
//! used elsewhere in the corpus for credential vaults, generalized to carry
//! an explicit salt (one PBKDF2 derivation per record, not a single
//! process-wide key) and to bind `keyId` as associated authenticated data.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{SecretsError, SecretsError as Err};

pub const SALT_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 210_000;

/// Ciphertext, tag, and the parameters needed to reverse the encryption.
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub iterations: u32,
}

/// Derives a 32-byte content-encryption key from `passphrase` and `salt` via
/// PBKDF2-HMAC-SHA256. Wrapped in [`Zeroizing`] so the derived key is wiped
/// from memory on drop.
fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, key.as_mut());
    key
}

/// Encrypts `plaintext` under `passphrase`, binding `key_id` as AAD so that
/// swapping ciphertexts between two provider records fails to decrypt.
pub fn seal(passphrase: &str, key_id: &str, plaintext: &str, iterations: u32) -> Sealed {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    rand::rng().fill_bytes(&mut iv);

    let key = derive_key(passphrase, &salt, iterations);
    let cipher = Aes256Gcm::new_from_slice(key.as_ref()).expect("key is exactly 32 bytes");
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext.as_bytes(),
                aad: key_id.as_bytes(),
            },
        )
        .expect("AES-256-GCM encryption does not fail for valid inputs");

    Sealed {
        ciphertext,
        salt,
        iv,
        iterations,
    }
}

/// Reverses [`seal`]. Any single-bit mutation of `ciphertext`, `salt`, `iv`,
/// or `key_id` causes this to return [`SecretsError::Decrypt`] rather than a
/// plaintext (the AEAD tag authenticates all of them).
pub fn open(
    passphrase: &str,
    key_id: &str,
    sealed: &Sealed,
    provider: &str,
) -> Result<String, SecretsError> {
    let key = derive_key(passphrase, &sealed.salt, sealed.iterations);
    let cipher = Aes256Gcm::new_from_slice(key.as_ref()).expect("key is exactly 32 bytes");
    let nonce = Nonce::from_slice(&sealed.iv);

    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &sealed.ciphertext,
                aad: key_id.as_bytes(),
            },
        )
        .map_err(|_| Err::Decrypt {
            provider: provider.to_string(),
        })?;

    String::from_utf8(plaintext).map_err(|_| Err::Decrypt {
        provider: provider.to_string(),
    })
}
