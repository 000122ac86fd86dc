//! Transparent encryption for PII columns.
//!
//! # Responsibility
//! - Turn plaintext PII values into opaque ciphertext blobs and back.
//! - Keep key material out of `Debug`, logs and error messages.
//!
//! # Invariants
//! - Only the repository layer calls this codec; services see plaintext.
//! - Every blob carries its own random nonce, so equal plaintexts produce
//!   different ciphertexts.
//! - Blob layout: `version (1 byte) || nonce (12 bytes) || ciphertext+tag`.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString};
use std::fmt::{Debug, Formatter};
use thiserror::Error;

const BLOB_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Codec failure. Messages never contain plaintext, ciphertext or key bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Configured key is not base64 or not 32 bytes long.
    #[error("encryption key must be 32 bytes of base64, got {actual_len} bytes")]
    InvalidKey { actual_len: usize },
    /// Ciphertext could not be authenticated: wrong key or corrupted blob.
    #[error("field decryption failed: {0}")]
    Decryption(&'static str),
    /// AEAD backend refused to encrypt.
    #[error("field encryption failed")]
    Encryption,
}

/// AES-256-GCM codec for encrypted columns.
///
/// Built once from configuration at startup and shared by reference.
#[derive(Clone)]
pub struct FieldCodec {
    cipher: Aes256Gcm,
}

impl Debug for FieldCodec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldCodec { cipher: <redacted> }")
    }
}

impl FieldCodec {
    /// Builds a codec from a base64-encoded 256-bit key.
    pub fn from_base64_key(key: &SecretString) -> Result<Self, CodecError> {
        let bytes = BASE64
            .decode(key.expose_secret().trim())
            .map_err(|_| CodecError::InvalidKey { actual_len: 0 })?;
        Self::from_key_bytes(&bytes)
    }

    /// Builds a codec from raw key bytes.
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != KEY_LEN {
            return Err(CodecError::InvalidKey {
                actual_len: bytes.len(),
            });
        }
        let key = Key::<Aes256Gcm>::from_slice(bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Generates a fresh random key, base64-encoded for configuration files.
    pub fn generate_key() -> SecretString {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        SecretString::from(BASE64.encode(key.as_slice()))
    }

    /// Encrypts one plaintext value into a self-describing blob.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CodecError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CodecError::Encryption)?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + sealed.len());
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Decrypts a blob produced by [`FieldCodec::encrypt`].
    pub fn decrypt(&self, blob: &[u8]) -> Result<String, CodecError> {
        if blob.len() < 1 + NONCE_LEN {
            return Err(CodecError::Decryption("blob too short"));
        }
        if blob[0] != BLOB_VERSION {
            return Err(CodecError::Decryption("unknown blob version"));
        }
        let nonce = Nonce::from_slice(&blob[1..1 + NONCE_LEN]);
        let plain = self
            .cipher
            .decrypt(nonce, &blob[1 + NONCE_LEN..])
            .map_err(|_| CodecError::Decryption("authentication failed"))?;
        String::from_utf8(plain).map_err(|_| CodecError::Decryption("plaintext is not utf-8"))
    }

    /// Encrypts an optional value as given; blank values persist as SQL NULL.
    pub fn encrypt_optional(&self, value: Option<&str>) -> Result<Option<Vec<u8>>, CodecError> {
        match value {
            Some(text) if !text.trim().is_empty() => self.encrypt(text).map(Some),
            _ => Ok(None),
        }
    }
}
