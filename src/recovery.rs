//! Social Recovery Coordinator
//!
//! Orchestrates splitting a wallet key among trustees and reconstructing it
//! from a quorum of their shares.
//!
//! ## Share creation
//!
//! 1. Verify the owner's second-factor code
//! 2. Decrypt the wallet's active key from the [`KeyVault`]
//! 3. Split it into one share per trustee (threshold `k`)
//! 4. Encrypt each share as `"<index>:<hex>"` and commit the whole set at once
//! 5. Tell each trustee which share they hold
//!
//! ## Recovery
//!
//! ```text
//! Idle ─► MfaPending ─► SharesCollecting ─► Reconstructing ─► Succeeded
//!             │                │                  │
//!             └────────────────┴──────────────────┴─────────► Failed
//! ```
//!
//! Every trustee is told about the attempt before any share is opened. If a
//! single submitted share fails to decrypt or parse, the whole attempt fails:
//! dropping just the bad share would let whoever corrupted it choose which
//! trustees end up excluded. Recoveries of the same wallet run one at a time.

use crate::crypto::envelope::{EncryptedPayload, EnvelopeCipher};
use crate::crypto::keys::KeyProvider;
use crate::crypto::shamir::{self, Share};
use crate::error::{RecoveryError, Result};
use crate::records::RecoveryShareRecord;
use crate::storage::RecoveryStore;
use crate::traits::{MfaVerifier, TrusteeNotifier};
use crate::vault::KeyVault;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Progress of the latest recovery session of a wallet
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    #[default]
    Idle,
    MfaPending,
    SharesCollecting,
    Reconstructing,
    Succeeded,
    Failed,
}

pub struct RecoveryCoordinator {
    store: Arc<dyn RecoveryStore>,
    cipher: EnvelopeCipher,
    vault: KeyVault,
    mfa: Arc<dyn MfaVerifier>,
    notifier: Arc<dyn TrusteeNotifier>,
    wallet_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    sessions: Mutex<HashMap<String, RecoveryState>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| RecoveryError::Storage(anyhow::anyhow!("coordinator lock poisoned")))
}

impl RecoveryCoordinator {
    pub fn new(
        store: Arc<dyn RecoveryStore>,
        keys: Arc<dyn KeyProvider>,
        mfa: Arc<dyn MfaVerifier>,
        notifier: Arc<dyn TrusteeNotifier>,
    ) -> Self {
        let cipher = EnvelopeCipher::new(keys);
        let vault = KeyVault::new(store.clone(), cipher.clone());
        Self {
            store,
            cipher,
            vault,
            mfa,
            notifier,
            wallet_locks: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    fn check_mfa(&self, owner_id: &str, code: u32) -> Result<()> {
        if self.mfa.verify(owner_id, code)? {
            Ok(())
        } else {
            tracing::warn!(owner = owner_id, "second-factor code rejected");
            Err(RecoveryError::MfaInvalid)
        }
    }

    // ========================================================================
    // Share creation
    // ========================================================================

    /// Split the wallet's active key among `trustees`, any `threshold` of whom
    /// can later recover it
    ///
    /// Replaces any previous share set of the wallet in one atomic write.
    /// Trustees are notified only after the set is committed.
    pub fn create_shares(
        &self,
        wallet_id: &str,
        owner_id: &str,
        trustees: &[String],
        threshold: usize,
        mfa_code: u32,
    ) -> Result<Vec<RecoveryShareRecord>> {
        self.check_mfa(owner_id, mfa_code)?;
        validate_trustees(trustees, threshold)?;

        let secret = self.vault.get_active_key(wallet_id)?;
        let shares = shamir::split(&secret, trustees.len(), threshold)?;
        let total = trustees.len() as u32;
        let share_set_id = Uuid::new_v4();
        let aad = RecoveryShareRecord::associated_data(wallet_id, share_set_id);

        let now = Utc::now();
        let mut records = Vec::with_capacity(shares.len());
        for (share, trustee) in shares.iter().zip(trustees) {
            let encoded = share.encode();
            records.push(RecoveryShareRecord {
                id: Uuid::new_v4(),
                wallet_id: wallet_id.to_string(),
                share_set_id,
                share_index: share.index,
                total_shares: total,
                threshold: threshold as u32,
                trustee_id: trustee.clone(),
                encrypted_share: self.cipher.encrypt_with_aad(encoded.as_bytes(), &aad)?,
                verified: false,
                owner_id: owner_id.to_string(),
                created_at: now,
                updated_at: now,
            });
        }

        self.store.replace_share_set(wallet_id, records.clone())?;

        tracing::info!(
            wallet = wallet_id,
            total,
            threshold,
            "created recovery share set"
        );

        for record in &records {
            if let Err(e) = self.notifier.notify_share_created(
                &record.trustee_id,
                wallet_id,
                record.share_index,
                total,
            ) {
                tracing::warn!(trustee = %record.trustee_id, wallet = wallet_id, error = %e, "share notification failed");
            }
        }

        Ok(records)
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Reconstruct the wallet key from trustee-submitted encrypted shares
    ///
    /// Returns the key as lowercase hex. Concurrent calls for the same wallet
    /// are serialized.
    pub fn recover_private_key(
        &self,
        wallet_id: &str,
        submitted: &[EncryptedPayload],
        owner_id: &str,
        mfa_code: u32,
    ) -> Result<Zeroizing<String>> {
        let wallet_lock = self.wallet_lock(wallet_id)?;
        let guard = lock(&*wallet_lock)?;

        let result = self.run_recovery(wallet_id, submitted, owner_id, mfa_code);
        let recorded = match &result {
            Ok(_) => self.set_state(wallet_id, RecoveryState::Succeeded),
            Err(e) => {
                tracing::warn!(wallet = wallet_id, error = %e, "recovery failed");
                self.set_state(wallet_id, RecoveryState::Failed)
            }
        };

        drop(guard);
        self.release_wallet_lock(wallet_id, wallet_lock)?;
        recorded?;
        result
    }

    fn run_recovery(
        &self,
        wallet_id: &str,
        submitted: &[EncryptedPayload],
        owner_id: &str,
        mfa_code: u32,
    ) -> Result<Zeroizing<String>> {
        self.set_state(wallet_id, RecoveryState::MfaPending)?;
        self.check_mfa(owner_id, mfa_code)?;

        let registered = self.store.share_set(wallet_id)?;
        let shape = share_set_shape(wallet_id, &registered)?;
        let aad = RecoveryShareRecord::associated_data(wallet_id, shape.share_set_id);

        self.set_state(wallet_id, RecoveryState::SharesCollecting)?;
        for record in &registered {
            if let Err(e) = self
                .notifier
                .notify_recovery_attempt(&record.trustee_id, wallet_id)
            {
                tracing::warn!(trustee = %record.trustee_id, wallet = wallet_id, error = %e, "attempt notification failed");
            }
        }

        let shares = submitted
            .iter()
            .map(|payload| self.open_share(payload, &aad, shape.total))
            .collect::<Result<Vec<Share>>>()?;

        tracing::debug!(
            wallet = wallet_id,
            provided = shares.len(),
            threshold = shape.threshold,
            "submitted shares authenticated"
        );

        self.set_state(wallet_id, RecoveryState::Reconstructing)?;
        let secret = shamir::recover(&shares, shape.threshold)?;

        for record in &registered {
            if let Err(e) = self
                .notifier
                .notify_recovery_complete(&record.trustee_id, wallet_id)
            {
                tracing::warn!(trustee = %record.trustee_id, wallet = wallet_id, error = %e, "completion notification failed");
            }
        }

        tracing::info!(wallet = wallet_id, "wallet key recovered");
        Ok(secret.to_hex())
    }

    /// Decrypt and parse one submitted share; any failure is fatal to the attempt
    ///
    /// Shares sealed for another wallet or an earlier share set fail
    /// authentication here, before they can reach interpolation.
    fn open_share(&self, payload: &EncryptedPayload, aad: &[u8], total: u32) -> Result<Share> {
        let plaintext = self.cipher.decrypt_with_aad(payload, aad)?;
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| RecoveryError::ShareFormatError("share is not valid UTF-8".to_string()))?;
        let share = Share::decode(text)?;
        if share.index > total {
            return Err(RecoveryError::ShareFormatError(format!(
                "share index {} exceeds share set size {}",
                share.index, total
            )));
        }
        Ok(share)
    }

    // ========================================================================
    // Trustee bookkeeping
    // ========================================================================

    /// Mark a share as confirmed by its trustee; repeated calls are no-ops
    pub fn verify_share(&self, share_id: Uuid) -> Result<RecoveryShareRecord> {
        let mut record = self
            .store
            .share(share_id)?
            .ok_or_else(|| RecoveryError::ShareNotFound(share_id.to_string()))?;

        if record.verified {
            return Ok(record);
        }

        record.verified = true;
        record.updated_at = Utc::now();
        if !self.store.update_share(&record)? {
            return Err(RecoveryError::ShareNotFound(share_id.to_string()));
        }

        tracing::info!(
            wallet = %record.wallet_id,
            index = record.share_index,
            "trustee verified share"
        );
        Ok(record)
    }

    /// The wallet's current share set, payloads still encrypted
    pub fn wallet_shares(&self, wallet_id: &str) -> Result<Vec<RecoveryShareRecord>> {
        Ok(self.store.share_set(wallet_id)?)
    }

    /// State of the wallet's latest recovery session
    pub fn session_state(&self, wallet_id: &str) -> Result<RecoveryState> {
        Ok(lock(&self.sessions)?
            .get(wallet_id)
            .copied()
            .unwrap_or_default())
    }

    fn set_state(&self, wallet_id: &str, state: RecoveryState) -> Result<()> {
        lock(&self.sessions)?.insert(wallet_id.to_string(), state);
        tracing::debug!(wallet = wallet_id, ?state, "recovery state");
        Ok(())
    }

    fn wallet_lock(&self, wallet_id: &str) -> Result<Arc<Mutex<()>>> {
        Ok(lock(&self.wallet_locks)?
            .entry(wallet_id.to_string())
            .or_default()
            .clone())
    }

    /// Forget the wallet's mutex once no other recovery holds or awaits it
    fn release_wallet_lock(&self, wallet_id: &str, wallet_lock: Arc<Mutex<()>>) -> Result<()> {
        let mut locks = lock(&self.wallet_locks)?;
        // clones are only handed out under `wallet_locks`: map + ours = idle
        if Arc::strong_count(&wallet_lock) == 2 {
            locks.remove(wallet_id);
        }
        Ok(())
    }

    #[cfg(test)]
    fn tracked_wallet_locks(&self) -> usize {
        self.wallet_locks.lock().map(|l| l.len()).unwrap_or_default()
    }
}

/// Shape of a registered share set
struct ShareSetShape {
    share_set_id: Uuid,
    total: u32,
    threshold: usize,
}

fn validate_trustees(trustees: &[String], threshold: usize) -> Result<()> {
    if trustees.is_empty() {
        return Err(RecoveryError::ThresholdExceedsShares {
            threshold,
            total: 0,
        });
    }
    let mut seen = BTreeSet::new();
    for trustee in trustees {
        if trustee.trim().is_empty() {
            return Err(RecoveryError::InvalidTrustees("empty trustee id".to_string()));
        }
        if !seen.insert(trustee.as_str()) {
            return Err(RecoveryError::InvalidTrustees(format!(
                "trustee '{}' listed twice",
                trustee
            )));
        }
    }
    Ok(())
}

/// Set id, `n` and `k` of a stored share set, checking every row agrees
fn share_set_shape(wallet_id: &str, records: &[RecoveryShareRecord]) -> Result<ShareSetShape> {
    let first = records
        .first()
        .ok_or_else(|| RecoveryError::WalletNotFound(wallet_id.to_string()))?;

    let consistent = records.iter().all(|r| {
        r.share_set_id == first.share_set_id
            && r.total_shares == first.total_shares
            && r.threshold == first.threshold
            && r.share_index >= 1
            && r.share_index <= r.total_shares
    });
    if !consistent || first.threshold == 0 || first.threshold > first.total_shares {
        return Err(RecoveryError::Storage(anyhow::anyhow!(
            "inconsistent share set for wallet '{}'",
            wallet_id
        )));
    }

    Ok(ShareSetShape {
        share_set_id: first.share_set_id,
        total: first.total_shares,
        threshold: first.threshold as usize,
    })
}
