//! Persistent record types
//!
//! Both records only ever hold encrypted key material. They serialize to JSON
//! for the file store and for CLI output.

use crate::crypto::envelope::EncryptedPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a wallet key is expected to be recovered
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryType {
    #[default]
    Social,
    Mfa,
    Cloud,
}

impl std::str::FromStr for RecoveryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "social" => Ok(Self::Social),
            "mfa" => Ok(Self::Mfa),
            "cloud" => Ok(Self::Cloud),
            other => Err(format!("unknown recovery type '{}'", other)),
        }
    }
}

/// Encrypted private key of a wallet
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WalletKeyRecord {
    pub id: Uuid,
    pub wallet_id: String,
    pub encrypted_key: EncryptedPayload,
    pub active: bool,
    pub owner_id: String,
    #[serde(default)]
    pub recovery_type: RecoveryType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletKeyRecord {
    pub fn new(
        wallet_id: &str,
        owner_id: &str,
        encrypted_key: EncryptedPayload,
        recovery_type: RecoveryType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet_id: wallet_id.to_string(),
            encrypted_key,
            active: true,
            owner_id: owner_id.to_string(),
            recovery_type,
            created_at: now,
            updated_at: now,
        }
    }
}

impl WalletKeyRecord {
    /// Associated data binding an encrypted key to its wallet
    pub fn associated_data(wallet_id: &str) -> Vec<u8> {
        bound_context(b"keyquorum/wallet-key", wallet_id, None)
    }
}

/// One trustee's encrypted share of a wallet key
///
/// All records of a share set carry the same `share_set_id`, `total_shares`
/// and `threshold`. A share is sealed to its wallet and set, so it cannot be
/// replayed into another wallet's recovery or mixed with a newer set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RecoveryShareRecord {
    pub id: Uuid,
    pub wallet_id: String,
    /// Generation of the share set, new on every split
    pub share_set_id: Uuid,
    pub share_index: u32,
    pub total_shares: u32,
    pub threshold: u32,
    pub trustee_id: String,
    pub encrypted_share: EncryptedPayload,
    pub verified: bool,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecoveryShareRecord {
    /// Associated data binding an encrypted share to its wallet and share set
    pub fn associated_data(wallet_id: &str, share_set_id: Uuid) -> Vec<u8> {
        bound_context(b"keyquorum/share", wallet_id, Some(share_set_id))
    }
}

// tag || len(wallet_id) as u32 BE || wallet_id || [set id]
fn bound_context(tag: &[u8], wallet_id: &str, share_set_id: Option<Uuid>) -> Vec<u8> {
    let mut aad = Vec::with_capacity(tag.len() + 4 + wallet_id.len() + 16);
    aad.extend_from_slice(tag);
    aad.extend_from_slice(&(wallet_id.len() as u32).to_be_bytes());
    aad.extend_from_slice(wallet_id.as_bytes());
    if let Some(id) = share_set_id {
        aad.extend_from_slice(id.as_bytes());
    }
    aad
}

/// Summary of a share set without the encrypted payloads
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShareSetInfo {
    pub wallet_id: String,
    pub share_set_id: Uuid,
    pub total_shares: u32,
    pub threshold: u32,
    pub trustees: Vec<String>,
    pub verified: usize,
}

impl ShareSetInfo {
    /// Summarize a non-empty share set
    pub fn from_records(records: &[RecoveryShareRecord]) -> Option<Self> {
        let first = records.first()?;
        Some(Self {
            wallet_id: first.wallet_id.clone(),
            share_set_id: first.share_set_id,
            total_shares: first.total_shares,
            threshold: first.threshold,
            trustees: records.iter().map(|r| r.trustee_id.clone()).collect(),
            verified: records.iter().filter(|r| r.verified).count(),
        })
    }
}
