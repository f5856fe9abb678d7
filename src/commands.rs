//! Operator Commands
//!
//! Each `*_core` function runs one operation against a coordinator and
//! returns a [`CommandResult`]: a readable summary plus a JSON line that can
//! be fed to the next command (`create-shares` output is valid `recover`
//! input, for example). The binary only parses arguments and prints.

use crate::config::Config;
use crate::crypto::envelope::EncryptedPayload;
use crate::crypto::field::FieldElement;
use crate::crypto::shamir::Secret;
use crate::records::{RecoveryShareRecord, RecoveryType, ShareSetInfo};
use crate::recovery::RecoveryCoordinator;
use crate::storage::FileStore;
use crate::traits::{LogNotifier, StaticMfaVerifier};
use crate::CommandResult;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

/// Coordinator over the configured file store, key ring and static verifier
pub fn open_coordinator(config: &Config) -> Result<RecoveryCoordinator> {
    let store = FileStore::new(&config.state_dir)?;
    let keys = config.key_ring()?;
    let mfa = StaticMfaVerifier::new(config.mfa_codes.clone());
    tracing::debug!(
        state_dir = %config.state_dir.display(),
        key_version = keys.active_version(),
        "opened state"
    );
    Ok(RecoveryCoordinator::new(
        Arc::new(store),
        Arc::new(keys),
        Arc::new(mfa),
        Arc::new(LogNotifier),
    ))
}

// ============================================================================
// Wallet keys
// ============================================================================

#[derive(Serialize, Deserialize, Debug)]
struct StoredKeyOutput {
    record_id: Uuid,
    wallet_id: String,
    key_version: u32,
    recovery_type: RecoveryType,
    generated: bool,
}

/// Encrypt and store a wallet key; a fresh random key is generated when
/// `secret_hex` is `None`
pub fn store_key_core(
    coordinator: &RecoveryCoordinator,
    wallet_id: &str,
    owner_id: &str,
    secret_hex: Option<&str>,
    recovery_type: RecoveryType,
) -> Result<CommandResult> {
    let generated = secret_hex.is_none();
    let secret = match secret_hex {
        Some(hex) => Secret::from_hex(hex).context("Invalid private key")?,
        None => Secret::from(FieldElement::random(&mut rand::rngs::OsRng)),
    };
    let record = coordinator
        .vault()
        .store_key(wallet_id, owner_id, &secret, recovery_type)?;

    let mut out = String::new();
    out.push_str("Store Wallet Key\n\n");
    out.push_str(RULE);
    out.push_str(&format!("  Wallet:        {}\n", wallet_id));
    out.push_str(&format!("  Owner:         {}\n", owner_id));
    out.push_str(&format!("  Recovery type: {:?}\n", recovery_type));
    out.push_str(&format!(
        "  Key version:   {}\n",
        record.encrypted_key.key_version
    ));
    if generated {
        out.push_str("\nGenerated a new random key. It is stored encrypted only;\n");
        out.push_str("create recovery shares before relying on it.\n");
    }

    let result = serde_json::to_string(&StoredKeyOutput {
        record_id: record.id,
        wallet_id: record.wallet_id,
        key_version: record.encrypted_key.key_version,
        recovery_type: record.recovery_type,
        generated,
    })?;
    Ok(CommandResult {
        output: out,
        result,
    })
}

/// Key records of an owner, payloads still encrypted
pub fn list_keys_core(coordinator: &RecoveryCoordinator, owner_id: &str) -> Result<CommandResult> {
    let records = coordinator.vault().list_owner_keys(owner_id)?;

    let mut out = String::new();
    out.push_str(&format!("Wallet Keys of '{}'\n\n", owner_id));
    out.push_str(RULE);
    if records.is_empty() {
        out.push_str("  (none)\n");
    }
    for record in &records {
        out.push_str(&format!(
            "  {:<24} v{:<3} {:<8} {}\n",
            record.wallet_id,
            record.encrypted_key.key_version,
            if record.active { "active" } else { "retired" },
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
        ));
    }

    Ok(CommandResult {
        output: out,
        result: serde_json::to_string(&records)?,
    })
}

/// Re-encrypt a wallet key under the active key version
pub fn rotate_key_core(coordinator: &RecoveryCoordinator, wallet_id: &str) -> Result<CommandResult> {
    let record = coordinator.vault().rotate(wallet_id)?;

    let mut out = String::new();
    out.push_str("Rotate Wallet Key\n\n");
    out.push_str(RULE);
    out.push_str(&format!("  Wallet:      {}\n", wallet_id));
    out.push_str(&format!(
        "  Key version: {}\n",
        record.encrypted_key.key_version
    ));

    Ok(CommandResult {
        output: out,
        result: serde_json::to_string(&record)?,
    })
}

// ============================================================================
// Recovery shares
// ============================================================================

pub fn create_shares_core(
    coordinator: &RecoveryCoordinator,
    wallet_id: &str,
    owner_id: &str,
    trustees: &[String],
    threshold: usize,
    mfa_code: u32,
) -> Result<CommandResult> {
    let records = coordinator.create_shares(wallet_id, owner_id, trustees, threshold, mfa_code)?;

    let mut out = String::new();
    out.push_str("Create Recovery Shares\n\n");
    out.push_str(RULE);
    out.push_str(&format!("  Wallet:    {}\n", wallet_id));
    out.push_str(&format!(
        "  Threshold: {}-of-{} (any {} trustees can recover)\n\n",
        threshold,
        trustees.len(),
        threshold
    ));
    for record in &records {
        out.push_str(&format!(
            "  share {:>3} → {} ({})\n",
            record.share_index, record.trustee_id, record.id
        ));
    }
    out.push_str("\nEach trustee keeps their encrypted share. Any previous\n");
    out.push_str("share set of this wallet is no longer valid.\n");

    Ok(CommandResult {
        output: out,
        result: serde_json::to_string(&records)?,
    })
}

/// A submitted share: either a full record as printed by `create-shares` or
/// just its encrypted payload
#[derive(Deserialize)]
#[serde(untagged)]
enum Submission {
    Record(RecoveryShareRecord),
    Payload(EncryptedPayload),
}

impl Submission {
    fn into_payload(self) -> EncryptedPayload {
        match self {
            Submission::Record(record) => record.encrypted_share,
            Submission::Payload(payload) => payload,
        }
    }
}

/// Parse a JSON array of submitted shares
pub fn parse_submissions(data: &str) -> Result<Vec<EncryptedPayload>> {
    let submissions: Vec<Submission> =
        serde_json::from_str(data).context("Expected a JSON array of shares")?;
    Ok(submissions.into_iter().map(Submission::into_payload).collect())
}

#[derive(Serialize, Deserialize, Debug)]
struct RecoveredOutput {
    wallet_id: String,
    private_key: String,
}

pub fn recover_core(
    coordinator: &RecoveryCoordinator,
    wallet_id: &str,
    owner_id: &str,
    mfa_code: u32,
    data: &str,
) -> Result<CommandResult> {
    let submitted = parse_submissions(data)?;
    let key = coordinator.recover_private_key(wallet_id, &submitted, owner_id, mfa_code)?;

    let mut out = String::new();
    out.push_str("Recover Wallet Key\n\n");
    out.push_str(RULE);
    out.push_str(&format!("  Wallet: {}\n", wallet_id));
    out.push_str(&format!("  Shares: {}\n\n", submitted.len()));
    out.push_str("Key reconstructed. Handle the result as a live secret.\n");

    let result = serde_json::to_string(&RecoveredOutput {
        wallet_id: wallet_id.to_string(),
        private_key: key.as_str().to_string(),
    })?;
    Ok(CommandResult {
        output: out,
        result,
    })
}

pub fn verify_share_core(coordinator: &RecoveryCoordinator, share_id: &str) -> Result<CommandResult> {
    let id = Uuid::parse_str(share_id.trim()).context("Invalid share id")?;
    let record = coordinator.verify_share(id)?;

    let mut out = String::new();
    out.push_str("Verify Share\n\n");
    out.push_str(RULE);
    out.push_str(&format!(
        "  {} confirmed share {} of {} for wallet {}\n",
        record.trustee_id, record.share_index, record.total_shares, record.wallet_id
    ));

    Ok(CommandResult {
        output: out,
        result: serde_json::to_string(&record)?,
    })
}

pub fn list_shares_core(coordinator: &RecoveryCoordinator, wallet_id: &str) -> Result<CommandResult> {
    let records = coordinator.wallet_shares(wallet_id)?;

    let mut out = String::new();
    out.push_str(&format!("Recovery Shares of '{}'\n\n", wallet_id));
    out.push_str(RULE);
    let info = ShareSetInfo::from_records(&records);
    match &info {
        None => out.push_str("  (no share set)\n"),
        Some(info) => {
            out.push_str(&format!(
                "  {}-of-{}, {} verified\n\n",
                info.threshold, info.total_shares, info.verified
            ));
            for record in &records {
                out.push_str(&format!(
                    "  {:>3}  {:<20} {}\n",
                    record.share_index,
                    record.trustee_id,
                    if record.verified { "verified" } else { "pending" }
                ));
            }
        }
    }

    Ok(CommandResult {
        output: out,
        result: serde_json::to_string(&info)?,
    })
}
