//! Envelope Encryption for Data at Rest
//!
//! Private keys and trustee shares are sealed with ChaCha20-Poly1305 under a
//! key from the [`KeyProvider`]. The stored form is:
//!
//! ```text
//! base64( nonce (12 bytes) || ciphertext || tag (16 bytes) )
//! ```
//!
//! A fresh random nonce is drawn for every encryption; there is no API for
//! supplying one. Callers bind a payload to its context (wallet, share set)
//! through associated data, which is authenticated but not stored: opening
//! with different associated data fails like any other tampering, with
//! [`RecoveryError::AuthenticationFailure`] and no plaintext released.

use crate::crypto::keys::{KeyProvider, SymmetricKey};
use crate::error::{RecoveryError, Result};
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zeroize::Zeroizing;

/// ChaCha20-Poly1305 nonce size (96 bits)
pub const NONCE_SIZE: usize = 12;
/// Poly1305 tag size (128 bits)
pub const TAG_SIZE: usize = 16;

/// A sealed payload together with the key version that sealed it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub key_version: u32,
    /// base64 of nonce || ciphertext || tag
    pub data: String,
}

/// Encrypt `plaintext` under `key`, returning the base64 envelope
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<String> {
    seal_with_aad(key, plaintext, &[])
}

/// [`seal`] with associated data that must be presented again to open
pub fn seal_with_aad(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> Result<String> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| RecoveryError::KeyMisconfigured("invalid ChaCha20-Poly1305 key".to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    // ciphertext already carries the tag at its end
    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| RecoveryError::Storage(anyhow::anyhow!("encryption failed: {:?}", e)))?;

    let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ciphertext);

    Ok(base64::engine::general_purpose::STANDARD.encode(&payload))
}

/// Decrypt a base64 envelope produced by [`seal`]
pub fn open(key: &SymmetricKey, data: &str) -> Result<Zeroizing<Vec<u8>>> {
    open_with_aad(key, data, &[])
}

/// Decrypt an envelope produced by [`seal_with_aad`] with the same `aad`
pub fn open_with_aad(key: &SymmetricKey, data: &str, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let payload = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|_| RecoveryError::AuthenticationFailure)?;

    if payload.len() < NONCE_SIZE + TAG_SIZE {
        return Err(RecoveryError::AuthenticationFailure);
    }

    let (nonce, ciphertext) = payload.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| RecoveryError::KeyMisconfigured("invalid ChaCha20-Poly1305 key".to_string()))?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| RecoveryError::AuthenticationFailure)
}

/// Seals and opens payloads with keys from a [`KeyProvider`]
#[derive(Clone)]
pub struct EnvelopeCipher {
    keys: Arc<dyn KeyProvider>,
}

impl EnvelopeCipher {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    /// Encrypt under the active key version
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        self.encrypt_with_aad(plaintext, &[])
    }

    /// Encrypt under the active key version, bound to `aad`
    pub fn encrypt_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> Result<EncryptedPayload> {
        let (key_version, key) = self.keys.active()?;
        Ok(EncryptedPayload {
            key_version,
            data: seal_with_aad(&key, plaintext, aad)?,
        })
    }

    /// Decrypt with the key version recorded in the payload
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Zeroizing<Vec<u8>>> {
        self.decrypt_with_aad(payload, &[])
    }

    pub fn decrypt_with_aad(
        &self,
        payload: &EncryptedPayload,
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.keys.key(payload.key_version)?;
        open_with_aad(&key, &payload.data, aad)
    }

    /// Version new payloads are sealed under
    pub fn active_version(&self) -> Result<u32> {
        Ok(self.keys.active()?.0)
    }
}
