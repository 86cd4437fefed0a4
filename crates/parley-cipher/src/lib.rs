//! At-rest encryption for message bodies.
//!
//! This crate provides authenticated encryption using:
//! - AES-256-GCM for confidentiality and integrity
//! - a 96-bit nonce drawn from the OS CSPRNG on every call
//!
//! The nonce, ciphertext and authentication tag are carried as separate
//! base64 fields so a stored payload can be validated field-by-field before
//! any decryption is attempted.  A payload with a missing or malformed field
//! is a decryption failure, never a panic.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key size for AES-256.
const KEY_SIZE: usize = 32;

/// Nonce size for AES-GCM.
const NONCE_SIZE: usize = 12;

/// Authentication-tag size for AES-GCM.
const TAG_SIZE: usize = 16;

/// Errors that can occur while encrypting or decrypting a message body.
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("encryption key must be a base64-encoded {}-byte value", KEY_SIZE)]
    InvalidKey,

    #[error("encrypted payload field `{0}` is missing or malformed")]
    MalformedField(&'static str),

    #[error("ciphertext failed authentication")]
    Verification,

    #[error("decrypted content is not valid UTF-8")]
    InvalidUtf8,

    #[error("encryption failed")]
    EncryptionFailed,
}

/// The at-rest representation of a message body.
///
/// All three fields are produced together by one [`MessageCipher::encrypt`]
/// call and must be consumed together by one [`MessageCipher::decrypt`] call.
/// The serde representation matches the JSON stored in the database row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Per-message nonce, base64.
    pub iv: String,
    /// Encrypted bytes, base64.
    pub ciphertext: String,
    /// GCM authentication tag, base64.
    pub tag: String,
}

/// Symmetric cipher for message bodies.
///
/// Holds the process-wide key, decoded once at startup.  Cloning is cheap and
/// shares no mutable state.
#[derive(Clone)]
pub struct MessageCipher {
    cipher: Aes256Gcm,
}

impl MessageCipher {
    /// Build a cipher from a base64-encoded 256-bit key.
    pub fn from_base64(key: &str) -> Result<Self, CipherError> {
        let key = BASE64.decode(key).map_err(|_| CipherError::InvalidKey)?;
        if key.len() != KEY_SIZE {
            return Err(CipherError::InvalidKey);
        }
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CipherError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Encrypt `plaintext` under a freshly generated nonce.
    ///
    /// The nonce is drawn from the OS CSPRNG on every call; it is never
    /// cached or derived, since reuse under the same key breaks
    /// confidentiality.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedPayload, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut combined = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptionFailed)?;
        // The AEAD appends the tag to the ciphertext; store them separately.
        let tag = combined.split_off(combined.len() - TAG_SIZE);

        Ok(EncryptedPayload {
            iv: BASE64.encode(nonce),
            ciphertext: BASE64.encode(&combined),
            tag: BASE64.encode(&tag),
        })
    }

    /// Decrypt a stored payload.
    ///
    /// Fails closed: a wrong key, a tampered ciphertext or tag, or a
    /// malformed field yields an error, never garbage plaintext.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<String, CipherError> {
        let iv = BASE64
            .decode(&payload.iv)
            .map_err(|_| CipherError::MalformedField("iv"))?;
        if iv.len() != NONCE_SIZE {
            return Err(CipherError::MalformedField("iv"));
        }
        let mut combined = BASE64
            .decode(&payload.ciphertext)
            .map_err(|_| CipherError::MalformedField("ciphertext"))?;
        let tag = BASE64
            .decode(&payload.tag)
            .map_err(|_| CipherError::MalformedField("tag"))?;
        if tag.len() != TAG_SIZE {
            return Err(CipherError::MalformedField("tag"));
        }
        combined.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), combined.as_ref())
            .map_err(|_| CipherError::Verification)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
    }
}
