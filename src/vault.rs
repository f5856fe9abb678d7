//! Wallet key vault
//!
//! Maps a wallet id to its single active encrypted private key. Plaintext keys
//! exist only transiently inside [`KeyVault::get_active_key`] and
//! [`KeyVault::store_key`]. Each payload is sealed to its wallet id, so a
//! ciphertext copied onto another wallet's record does not decrypt.

use crate::crypto::envelope::EnvelopeCipher;
use crate::crypto::shamir::Secret;
use crate::error::{RecoveryError, Result};
use crate::records::{RecoveryType, WalletKeyRecord};
use crate::storage::RecoveryStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct KeyVault {
    store: Arc<dyn RecoveryStore>,
    cipher: EnvelopeCipher,
}

impl KeyVault {
    pub fn new(store: Arc<dyn RecoveryStore>, cipher: EnvelopeCipher) -> Self {
        Self { store, cipher }
    }

    /// Decrypt and parse the wallet's active private key
    pub fn get_active_key(&self, wallet_id: &str) -> Result<Secret> {
        let record = self
            .store
            .active_wallet_key(wallet_id)?
            .ok_or_else(|| RecoveryError::WalletNotFound(wallet_id.to_string()))?;

        let aad = WalletKeyRecord::associated_data(wallet_id);
        let plaintext = self.cipher.decrypt_with_aad(&record.encrypted_key, &aad)?;
        let hex = std::str::from_utf8(&plaintext).map_err(|_| {
            RecoveryError::ShareFormatError("stored key is not valid UTF-8".to_string())
        })?;
        Secret::from_hex(hex)
    }

    /// Encrypt and store a new active key, deactivating any previous one
    pub fn store_key(
        &self,
        wallet_id: &str,
        owner_id: &str,
        secret: &Secret,
        recovery_type: RecoveryType,
    ) -> Result<WalletKeyRecord> {
        let hex = secret.to_hex();
        let aad = WalletKeyRecord::associated_data(wallet_id);
        let encrypted = self.cipher.encrypt_with_aad(hex.as_bytes(), &aad)?;
        let record = WalletKeyRecord::new(wallet_id, owner_id, encrypted, recovery_type);
        self.store.activate_wallet_key(record.clone())?;

        tracing::info!(
            wallet = wallet_id,
            key_version = record.encrypted_key.key_version,
            "stored wallet key"
        );
        Ok(record)
    }

    /// Re-encrypt the wallet's active key under the current key version
    pub fn rotate(&self, wallet_id: &str) -> Result<WalletKeyRecord> {
        let record = self
            .store
            .active_wallet_key(wallet_id)?
            .ok_or_else(|| RecoveryError::WalletNotFound(wallet_id.to_string()))?;

        let active_version = self.cipher.active_version()?;
        if record.encrypted_key.key_version == active_version {
            tracing::debug!(wallet = wallet_id, key_version = active_version, "key already current");
            return Ok(record);
        }

        let aad = WalletKeyRecord::associated_data(wallet_id);
        let plaintext = self.cipher.decrypt_with_aad(&record.encrypted_key, &aad)?;
        let rotated = WalletKeyRecord::new(
            wallet_id,
            &record.owner_id,
            self.cipher.encrypt_with_aad(&plaintext, &aad)?,
            record.recovery_type,
        );
        self.store.activate_wallet_key(rotated.clone())?;

        tracing::info!(
            wallet = wallet_id,
            from_version = record.encrypted_key.key_version,
            to_version = active_version,
            "rotated wallet key"
        );
        Ok(rotated)
    }

    /// Key records of an owner, payloads still encrypted
    pub fn list_owner_keys(&self, owner_id: &str) -> Result<Vec<WalletKeyRecord>> {
        Ok(self.store.wallet_keys_for_owner(owner_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{KeyRing, SymmetricKey};
    use crate::storage::MemoryStore;

    fn ring(byte: u8) -> KeyRing {
        KeyRing::single(1, SymmetricKey::from_slice(&[byte; 32]).unwrap())
    }

    fn vault_with(store: Arc<MemoryStore>, keys: KeyRing) -> KeyVault {
        KeyVault::new(store, EnvelopeCipher::new(Arc::new(keys)))
    }

    #[test]
    fn test_store_and_get() {
        let vault = vault_with(Arc::new(MemoryStore::new()), ring(1));
        let secret = Secret::from_hex(&"ab".repeat(32)).unwrap();
        let record = vault
            .store_key("w", "owner", &secret, RecoveryType::Social)
            .unwrap();
        assert!(record.active);
        // ciphertext, not the hex key
        assert!(!record.encrypted_key.data.contains(&"ab".repeat(32)));
        assert_eq!(vault.get_active_key("w").unwrap(), secret);
    }

    #[test]
    fn test_missing_wallet() {
        let vault = vault_with(Arc::new(MemoryStore::new()), ring(1));
        assert!(matches!(
            vault.get_active_key("nope"),
            Err(RecoveryError::WalletNotFound(_))
        ));
        assert!(matches!(
            vault.rotate("nope"),
            Err(RecoveryError::WalletNotFound(_))
        ));
    }

    #[test]
    fn test_store_replaces_active_key() {
        let vault = vault_with(Arc::new(MemoryStore::new()), ring(1));
        let a = Secret::from_hex("aa").unwrap();
        let b = Secret::from_hex("bb").unwrap();
        vault.store_key("w", "owner", &a, RecoveryType::Social).unwrap();
        vault.store_key("w", "owner", &b, RecoveryType::Cloud).unwrap();
        assert_eq!(vault.get_active_key("w").unwrap(), b);

        let records = vault.list_owner_keys("owner").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.iter().filter(|r| r.active).count(), 1);
    }

    #[test]
    fn test_wrong_key_is_authentication_failure() {
        let store = Arc::new(MemoryStore::new());
        let secret = Secret::from_hex("1234").unwrap();
        vault_with(store.clone(), ring(1))
            .store_key("w", "owner", &secret, RecoveryType::Social)
            .unwrap();
        assert!(matches!(
            vault_with(store, ring(2)).get_active_key("w"),
            Err(RecoveryError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_payload_moved_to_another_wallet_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault_with(store.clone(), ring(1));
        let a = vault
            .store_key("wallet-a", "owner", &Secret::from_hex("aa").unwrap(), RecoveryType::Social)
            .unwrap();
        vault
            .store_key("wallet-b", "owner", &Secret::from_hex("bb").unwrap(), RecoveryType::Social)
            .unwrap();

        // same master key, but the ciphertext belongs to wallet-a
        store
            .activate_wallet_key(WalletKeyRecord::new(
                "wallet-b",
                "owner",
                a.encrypted_key,
                RecoveryType::Social,
            ))
            .unwrap();
        assert!(matches!(
            vault.get_active_key("wallet-b"),
            Err(RecoveryError::AuthenticationFailure)
        ));
        assert_eq!(vault.get_active_key("wallet-a").unwrap(), Secret::from_hex("aa").unwrap());
    }

    #[test]
    fn test_rotate_to_new_version() {
        let store = Arc::new(MemoryStore::new());
        let mut keys = ring(1);
        let secret = Secret::from_hex("c0ffee").unwrap();
        vault_with(store.clone(), keys.clone())
            .store_key("w", "owner", &secret, RecoveryType::Mfa)
            .unwrap();

        keys.rotate(2, SymmetricKey::from_slice(&[2u8; 32]).unwrap())
            .unwrap();
        let vault = vault_with(store, keys);
        let rotated = vault.rotate("w").unwrap();
        assert_eq!(rotated.encrypted_key.key_version, 2);
        assert_eq!(rotated.recovery_type, RecoveryType::Mfa);
        assert_eq!(vault.get_active_key("w").unwrap(), secret);

        // second rotation is a no-op
        let again = vault.rotate("w").unwrap();
        assert_eq!(again.id, rotated.id);
    }
}
