//! Configuration
//!
//! Loaded from a TOML file, with environment overrides for deployments that
//! inject secrets at runtime:
//!
//! ```toml
//! state_dir = ".keyquorum_state"
//! active_key_version = 2
//!
//! [[keys]]
//! version = 1
//! material = "<base64, at least 32 bytes>"
//!
//! [[keys]]
//! version = 2
//! material = "<base64>"
//!
//! [mfa_codes]
//! "owner-1" = 123456
//! ```
//!
//! - `KEYQUORUM_MASTER_KEY` sets the material of the active key version
//! - `KEYQUORUM_STATE_DIR` overrides `state_dir`

use crate::crypto::keys::KeyRing;
use crate::error::{RecoveryError, Result as RecoveryResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const MASTER_KEY_ENV: &str = "KEYQUORUM_MASTER_KEY";
pub const STATE_DIR_ENV: &str = "KEYQUORUM_STATE_DIR";
pub const DEFAULT_STATE_DIR: &str = ".keyquorum_state";

/// One configured envelope key version
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub version: u32,
    /// base64 key material, stretched through HKDF before use
    pub material: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_active_version")]
    pub active_key_version: u32,
    #[serde(default)]
    pub keys: Vec<KeyEntry>,
    /// Codes accepted by the reference static verifier
    #[serde(default)]
    pub mfa_codes: HashMap<String, u32>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_active_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            active_key_version: default_active_version(),
            keys: Vec::new(),
            mfa_codes: HashMap::new(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid configuration")
    }

    /// Read `path` if given (defaults otherwise) and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
            self.state_dir = PathBuf::from(dir);
        }
        if let Ok(material) = std::env::var(MASTER_KEY_ENV) {
            let version = self.active_key_version;
            self.keys.retain(|k| k.version != version);
            self.keys.push(KeyEntry { version, material });
        }
    }

    /// Build the envelope key ring; fails when the active version has no key
    pub fn key_ring(&self) -> RecoveryResult<KeyRing> {
        if self.keys.is_empty() {
            return Err(RecoveryError::KeyMisconfigured(format!(
                "no envelope keys configured (set {} or add [[keys]])",
                MASTER_KEY_ENV
            )));
        }
        KeyRing::from_material(
            self.keys.iter().map(|k| (k.version, k.material.as_str())),
            self.active_key_version,
        )
    }
}
