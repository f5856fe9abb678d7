//! Versioned Symmetric Keys
//!
//! Configured key material is never used as a cipher key directly. Each
//! configured version is stretched through HKDF-SHA256 into a 256-bit key,
//! and every payload records which version sealed it:
//!
//! ```text
//! material (base64, >= 32 bytes) ──HKDF(salt, "keyquorum-envelope-v{n}")──► key_n
//!
//! encrypt ─► active version      decrypt ─► version stored in the payload
//! ```
//!
//! Rotating means adding a new version and making it active; payloads sealed
//! under older versions stay readable as long as their version is configured.

use crate::error::{RecoveryError, Result};
use base64::Engine;
use hkdf::Hkdf;
use sha2::Sha256;
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// Key length required by ChaCha20-Poly1305
pub const KEY_SIZE: usize = 32;

/// Minimum accepted length of decoded key material
pub const MIN_MATERIAL_SIZE: usize = 32;

const HKDF_SALT: &[u8] = b"keyquorum-envelope";

/// A 256-bit symmetric key, wiped on drop
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<[u8; KEY_SIZE]>);

impl SymmetricKey {
    /// Use raw bytes as a key; length must be exactly [`KEY_SIZE`]
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(RecoveryError::KeyMisconfigured(format!(
                "expected {} key bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Derive the key for `version` from configured material
    pub fn derive(material: &[u8], version: u32) -> Result<Self> {
        if material.len() < MIN_MATERIAL_SIZE {
            return Err(RecoveryError::KeyMisconfigured(format!(
                "key material for version {} is {} bytes, need at least {}",
                version,
                material.len(),
                MIN_MATERIAL_SIZE
            )));
        }
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), material);
        let info = format!("keyquorum-envelope-v{}", version);
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(info.as_bytes(), &mut key[..])
            .map_err(|_| RecoveryError::KeyMisconfigured("HKDF expand failed".to_string()))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Source of envelope keys
pub trait KeyProvider: Send + Sync {
    /// Version and key used for new encryptions
    fn active(&self) -> Result<(u32, SymmetricKey)>;

    /// Key for a specific version, for decrypting older payloads
    fn key(&self, version: u32) -> Result<SymmetricKey>;
}

/// In-memory set of versioned keys
#[derive(Debug, Clone)]
pub struct KeyRing {
    keys: BTreeMap<u32, SymmetricKey>,
    active_version: u32,
}

impl KeyRing {
    /// Ring with a single key that is also the active one
    pub fn single(version: u32, key: SymmetricKey) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(version, key);
        Self {
            keys,
            active_version: version,
        }
    }

    /// Build from `(version, base64 material)` pairs
    pub fn from_material<'a, I>(entries: I, active_version: u32) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, &'a str)>,
    {
        let mut keys = BTreeMap::new();
        for (version, material) in entries {
            let decoded = Zeroizing::new(
                base64::engine::general_purpose::STANDARD
                    .decode(material.trim())
                    .map_err(|_| {
                        RecoveryError::KeyMisconfigured(format!(
                            "key material for version {} is not valid base64",
                            version
                        ))
                    })?,
            );
            if keys
                .insert(version, SymmetricKey::derive(&decoded, version)?)
                .is_some()
            {
                return Err(RecoveryError::KeyMisconfigured(format!(
                    "key version {} configured twice",
                    version
                )));
            }
        }

        if !keys.contains_key(&active_version) {
            return Err(RecoveryError::KeyMisconfigured(format!(
                "no key configured for active version {}",
                active_version
            )));
        }

        Ok(Self {
            keys,
            active_version,
        })
    }

    /// Add a key and make it the active one
    pub fn rotate(&mut self, version: u32, key: SymmetricKey) -> Result<()> {
        if version <= self.active_version {
            return Err(RecoveryError::KeyMisconfigured(format!(
                "new key version {} must be greater than {}",
                version, self.active_version
            )));
        }
        self.keys.insert(version, key);
        self.active_version = version;
        Ok(())
    }

    pub fn active_version(&self) -> u32 {
        self.active_version
    }

    pub fn versions(&self) -> Vec<u32> {
        self.keys.keys().copied().collect()
    }
}

impl KeyProvider for KeyRing {
    fn active(&self) -> Result<(u32, SymmetricKey)> {
        Ok((self.active_version, self.key(self.active_version)?))
    }

    fn key(&self, version: u32) -> Result<SymmetricKey> {
        self.keys.get(&version).cloned().ok_or_else(|| {
            RecoveryError::KeyMisconfigured(format!("unknown key version {}", version))
        })
    }
}
