//! End-to-end recovery flow through the library API

use keyquorum::crypto::envelope::{EncryptedPayload, EnvelopeCipher};
use keyquorum::crypto::keys::{KeyRing, SymmetricKey};
use keyquorum::crypto::shamir::{Secret, Share};
use keyquorum::records::{RecoveryShareRecord, RecoveryType};
use keyquorum::storage::{FileStore, MemoryStore, RecoveryStore};
use keyquorum::traits::{Notification, NotificationLog, StaticMfaVerifier};
use keyquorum::{RecoveryCoordinator, RecoveryError, RecoveryState};
use std::sync::Arc;

const WALLET: &str = "wallet-W";
const OWNER: &str = "owner-1";
const MFA: u32 = 424242;
const KEY: &str = "8f3a5c7e9b1d2f4a6c8e0b2d4f6a8c0e1b3d5f7a9c2e4b6d8f0a1c3e5b7d9f2a";

fn trustees() -> Vec<String> {
    vec!["t1@example.com", "t2@example.com", "t3@example.com"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn ring() -> KeyRing {
    KeyRing::single(1, SymmetricKey::from_slice(&[42u8; 32]).unwrap())
}

fn coordinator_on(
    store: Arc<dyn RecoveryStore>,
    keys: KeyRing,
) -> (RecoveryCoordinator, Arc<NotificationLog>) {
    let log = Arc::new(NotificationLog::new());
    let coordinator = RecoveryCoordinator::new(
        store,
        Arc::new(keys),
        Arc::new(StaticMfaVerifier::default().with_code(OWNER, MFA)),
        log.clone(),
    );
    (coordinator, log)
}

fn payloads(coordinator: &RecoveryCoordinator, indices: &[u32]) -> Vec<EncryptedPayload> {
    coordinator
        .wallet_shares(WALLET)
        .unwrap()
        .into_iter()
        .filter(|r| indices.contains(&r.share_index))
        .map(|r| r.encrypted_share)
        .collect()
}

#[test]
fn test_three_trustee_scenario() {
    let (coordinator, _log) = coordinator_on(Arc::new(MemoryStore::new()), ring());
    let key = Secret::from_hex(KEY).unwrap();
    coordinator
        .vault()
        .store_key(WALLET, OWNER, &key, RecoveryType::Social)
        .unwrap();

    let records = coordinator
        .create_shares(WALLET, OWNER, &trustees(), 2, MFA)
        .unwrap();
    assert_eq!(records.len(), 3);
    let mut indices: Vec<u32> = records.iter().map(|r| r.share_index).collect();
    indices.sort();
    assert_eq!(indices, vec![1, 2, 3]);

    // each share opens on its own and parses as "<index>:<hex>"
    let cipher = EnvelopeCipher::new(Arc::new(ring()));
    for record in &records {
        let aad = RecoveryShareRecord::associated_data(WALLET, record.share_set_id);
        let plaintext = cipher
            .decrypt_with_aad(&record.encrypted_share, &aad)
            .unwrap();
        let share = Share::decode(std::str::from_utf8(&plaintext).unwrap()).unwrap();
        assert_eq!(share.index, record.share_index);
        assert_eq!(record.share_set_id, records[0].share_set_id);
        assert_eq!(record.threshold, 2);
        assert_eq!(record.total_shares, 3);
    }

    let recovered = coordinator
        .recover_private_key(WALLET, &payloads(&coordinator, &[1, 2]), OWNER, MFA)
        .unwrap();
    assert_eq!(recovered.as_str(), KEY);

    let err = coordinator
        .recover_private_key(WALLET, &payloads(&coordinator, &[1]), OWNER, MFA)
        .unwrap_err();
    assert!(matches!(
        err,
        RecoveryError::ThresholdNotMet {
            required: 2,
            provided: 1
        }
    ));
    assert_eq!(coordinator.session_state(WALLET).unwrap(), RecoveryState::Failed);
}

#[test]
fn test_every_pair_recovers_same_key() {
    let (coordinator, _log) = coordinator_on(Arc::new(MemoryStore::new()), ring());
    coordinator
        .vault()
        .store_key(WALLET, OWNER, &Secret::from_hex(KEY).unwrap(), RecoveryType::Social)
        .unwrap();
    coordinator
        .create_shares(WALLET, OWNER, &trustees(), 2, MFA)
        .unwrap();

    for pair in [[1u32, 2], [1, 3], [2, 3]] {
        let recovered = coordinator
            .recover_private_key(WALLET, &payloads(&coordinator, &pair), OWNER, MFA)
            .unwrap();
        assert_eq!(recovered.as_str(), KEY, "pair {:?}", pair);
    }
}

#[test]
fn test_notifications_follow_the_flow() {
    let (coordinator, log) = coordinator_on(Arc::new(MemoryStore::new()), ring());
    coordinator
        .vault()
        .store_key(WALLET, OWNER, &Secret::from_hex(KEY).unwrap(), RecoveryType::Social)
        .unwrap();
    coordinator
        .create_shares(WALLET, OWNER, &trustees(), 2, MFA)
        .unwrap();

    let created = log.drain();
    assert_eq!(created.len(), 3);
    assert!(created
        .iter()
        .all(|n| matches!(n, Notification::ShareCreated { total: 3, .. })));

    coordinator
        .recover_private_key(WALLET, &payloads(&coordinator, &[2, 3]), OWNER, MFA)
        .unwrap();
    let sent = log.drain();
    assert_eq!(sent.len(), 6);
    assert!(sent[..3]
        .iter()
        .all(|n| matches!(n, Notification::RecoveryAttempt { .. })));
    assert!(sent[3..]
        .iter()
        .all(|n| matches!(n, Notification::RecoveryComplete { .. })));
}

#[test]
fn test_wrong_mfa_blocks_everything() {
    let (coordinator, log) = coordinator_on(Arc::new(MemoryStore::new()), ring());
    coordinator
        .vault()
        .store_key(WALLET, OWNER, &Secret::from_hex(KEY).unwrap(), RecoveryType::Social)
        .unwrap();

    assert!(matches!(
        coordinator.create_shares(WALLET, OWNER, &trustees(), 2, MFA + 1),
        Err(RecoveryError::MfaInvalid)
    ));
    assert!(coordinator.wallet_shares(WALLET).unwrap().is_empty());

    coordinator
        .create_shares(WALLET, OWNER, &trustees(), 2, MFA)
        .unwrap();
    log.drain();

    assert!(matches!(
        coordinator.recover_private_key(WALLET, &payloads(&coordinator, &[1, 2]), OWNER, 0),
        Err(RecoveryError::MfaInvalid)
    ));
    assert!(log.sent().is_empty());
}

#[test]
fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let submitted = {
        let store = Arc::new(FileStore::new(dir.path()).unwrap());
        let (coordinator, _log) = coordinator_on(store, ring());
        coordinator
            .vault()
            .store_key(WALLET, OWNER, &Secret::from_hex(KEY).unwrap(), RecoveryType::Social)
            .unwrap();
        let records = coordinator
            .create_shares(WALLET, OWNER, &trustees(), 2, MFA)
            .unwrap();
        coordinator.verify_share(records[0].id).unwrap();
        payloads(&coordinator, &[1, 3])
    };

    let store = Arc::new(FileStore::new(dir.path()).unwrap());
    let (coordinator, _log) = coordinator_on(store, ring());
    let shares = coordinator.wallet_shares(WALLET).unwrap();
    assert_eq!(shares.len(), 3);
    assert!(shares[0].verified);
    assert!(!shares[1].verified);

    let recovered = coordinator
        .recover_private_key(WALLET, &submitted, OWNER, MFA)
        .unwrap();
    assert_eq!(recovered.as_str(), KEY);
}

#[test]
fn test_old_shares_open_after_key_rotation() {
    let store: Arc<dyn RecoveryStore> = Arc::new(MemoryStore::new());
    let (coordinator, _log) = coordinator_on(store.clone(), ring());
    coordinator
        .vault()
        .store_key(WALLET, OWNER, &Secret::from_hex(KEY).unwrap(), RecoveryType::Social)
        .unwrap();
    coordinator
        .create_shares(WALLET, OWNER, &trustees(), 2, MFA)
        .unwrap();
    let submitted = payloads(&coordinator, &[1, 2]);

    let mut keys = ring();
    keys.rotate(2, SymmetricKey::from_slice(&[7u8; 32]).unwrap())
        .unwrap();
    let (rotated, _log) = coordinator_on(store, keys);
    let record = rotated.vault().rotate(WALLET).unwrap();
    assert_eq!(record.encrypted_key.key_version, 2);

    // shares sealed under version 1 still open
    assert!(submitted.iter().all(|p| p.key_version == 1));
    let recovered = rotated
        .recover_private_key(WALLET, &submitted, OWNER, MFA)
        .unwrap();
    assert_eq!(recovered.as_str(), KEY);
}

#[test]
fn test_shares_from_previous_set_survive_restart_but_not_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let stale = {
        let store = Arc::new(FileStore::new(dir.path()).unwrap());
        let (coordinator, _log) = coordinator_on(store, ring());
        coordinator
            .vault()
            .store_key(WALLET, OWNER, &Secret::from_hex(KEY).unwrap(), RecoveryType::Social)
            .unwrap();
        coordinator
            .create_shares(WALLET, OWNER, &trustees(), 2, MFA)
            .unwrap();
        let stale = payloads(&coordinator, &[1]);
        coordinator
            .create_shares(WALLET, OWNER, &trustees(), 2, MFA)
            .unwrap();
        stale
    };

    let store = Arc::new(FileStore::new(dir.path()).unwrap());
    let (coordinator, _log) = coordinator_on(store, ring());
    let mut mixed = stale;
    mixed.extend(payloads(&coordinator, &[2]));
    assert!(matches!(
        coordinator.recover_private_key(WALLET, &mixed, OWNER, MFA),
        Err(RecoveryError::AuthenticationFailure)
    ));

    let recovered = coordinator
        .recover_private_key(WALLET, &payloads(&coordinator, &[1, 2]), OWNER, MFA)
        .unwrap();
    assert_eq!(recovered.as_str(), KEY);
}
