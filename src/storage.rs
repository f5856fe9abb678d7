use crate::records::{RecoveryShareRecord, WalletKeyRecord};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Durable store for wallet keys and recovery shares
///
/// Implementations must make [`RecoveryStore::replace_share_set`] and
/// [`RecoveryStore::activate_wallet_key`] all-or-nothing: a reader never sees
/// half of a share set or two active keys for one wallet.
pub trait RecoveryStore: Send + Sync {
    /// The single active key record of a wallet, if any
    fn active_wallet_key(&self, wallet_id: &str) -> Result<Option<WalletKeyRecord>>;

    /// Persist `record` as the wallet's active key, deactivating earlier ones
    fn activate_wallet_key(&self, record: WalletKeyRecord) -> Result<()>;

    /// All key records (active or not) belonging to an owner
    fn wallet_keys_for_owner(&self, owner_id: &str) -> Result<Vec<WalletKeyRecord>>;

    /// Atomically replace the wallet's share set with `records`
    fn replace_share_set(&self, wallet_id: &str, records: Vec<RecoveryShareRecord>) -> Result<()>;

    /// The wallet's share set ordered by index; empty when none exists
    fn share_set(&self, wallet_id: &str) -> Result<Vec<RecoveryShareRecord>>;

    fn share(&self, id: Uuid) -> Result<Option<RecoveryShareRecord>>;

    /// Overwrite an existing share record; returns false if it does not exist
    fn update_share(&self, record: &RecoveryShareRecord) -> Result<bool>;
}

fn deactivate_all(records: &mut [WalletKeyRecord]) {
    let now = Utc::now();
    for record in records.iter_mut().filter(|r| r.active) {
        record.active = false;
        record.updated_at = now;
    }
}

fn sorted_by_index(mut records: Vec<RecoveryShareRecord>) -> Vec<RecoveryShareRecord> {
    records.sort_by_key(|r| r.share_index);
    records
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryState {
    keys: HashMap<String, Vec<WalletKeyRecord>>,
    shares: HashMap<String, Vec<RecoveryShareRecord>>,
}

/// In-memory store, used by tests and embedders that bring their own persistence
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl RecoveryStore for MemoryStore {
    fn active_wallet_key(&self, wallet_id: &str) -> Result<Option<WalletKeyRecord>> {
        let state = self.read()?;
        Ok(state
            .keys
            .get(wallet_id)
            .and_then(|records| records.iter().find(|r| r.active).cloned()))
    }

    fn activate_wallet_key(&self, record: WalletKeyRecord) -> Result<()> {
        let mut state = self.write()?;
        let records = state.keys.entry(record.wallet_id.clone()).or_default();
        deactivate_all(records);
        records.push(record);
        Ok(())
    }

    fn wallet_keys_for_owner(&self, owner_id: &str) -> Result<Vec<WalletKeyRecord>> {
        let state = self.read()?;
        Ok(state
            .keys
            .values()
            .flatten()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn replace_share_set(&self, wallet_id: &str, records: Vec<RecoveryShareRecord>) -> Result<()> {
        let mut state = self.write()?;
        state
            .shares
            .insert(wallet_id.to_string(), sorted_by_index(records));
        Ok(())
    }

    fn share_set(&self, wallet_id: &str) -> Result<Vec<RecoveryShareRecord>> {
        let state = self.read()?;
        Ok(state.shares.get(wallet_id).cloned().unwrap_or_default())
    }

    fn share(&self, id: Uuid) -> Result<Option<RecoveryShareRecord>> {
        let state = self.read()?;
        Ok(state.shares.values().flatten().find(|r| r.id == id).cloned())
    }

    fn update_share(&self, record: &RecoveryShareRecord) -> Result<bool> {
        let mut state = self.write()?;
        let existing = state
            .shares
            .get_mut(&record.wallet_id)
            .and_then(|set| set.iter_mut().find(|r| r.id == record.id));
        match existing {
            Some(slot) => {
                *slot = record.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// File store
// ============================================================================

/// JSON file store for the CLI
///
/// ```text
/// <base_dir>/keys/<hex(wallet_id)>.json     all key records of a wallet
/// <base_dir>/shares/<hex(wallet_id)>.json   the wallet's current share set
/// ```
///
/// Each file is rewritten through a temporary file and a rename, so a crash
/// leaves either the old or the new contents, never a partial share set.
pub struct FileStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

const KEYS_DIR: &str = "keys";
const SHARES_DIR: &str = "shares";

impl FileStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let path = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(path.join(KEYS_DIR))
            .with_context(|| format!("Failed to create {}", path.display()))?;
        std::fs::create_dir_all(path.join(SHARES_DIR))?;
        Ok(Self {
            base_dir: path,
            write_lock: Mutex::new(()),
        })
    }

    fn file_for(&self, dir: &str, wallet_id: &str) -> PathBuf {
        // hex keeps arbitrary wallet ids safe as file names
        self.base_dir
            .join(dir)
            .join(format!("{}.json", hex::encode(wallet_id.as_bytes())))
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Corrupt store file {}", path.display()))
    }

    fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &[T]) -> Result<()> {
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        let json = serde_json::to_vec_pretty(value)?;
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path).with_context(|| format!("Failed to commit {}", path.display()))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("file store lock poisoned"))
    }

    fn all_share_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(self.base_dir.join(SHARES_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl RecoveryStore for FileStore {
    fn active_wallet_key(&self, wallet_id: &str) -> Result<Option<WalletKeyRecord>> {
        let records: Vec<WalletKeyRecord> = Self::read_json(&self.file_for(KEYS_DIR, wallet_id))?;
        Ok(records.into_iter().find(|r| r.active))
    }

    fn activate_wallet_key(&self, record: WalletKeyRecord) -> Result<()> {
        let _guard = self.lock()?;
        let path = self.file_for(KEYS_DIR, &record.wallet_id);
        let mut records: Vec<WalletKeyRecord> = Self::read_json(&path)?;
        deactivate_all(&mut records);
        records.push(record);
        Self::write_json_atomic(&path, &records)
    }

    fn wallet_keys_for_owner(&self, owner_id: &str) -> Result<Vec<WalletKeyRecord>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(self.base_dir.join(KEYS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let records: Vec<WalletKeyRecord> = Self::read_json(&path)?;
            found.extend(records.into_iter().filter(|r| r.owner_id == owner_id));
        }
        Ok(found)
    }

    fn replace_share_set(&self, wallet_id: &str, records: Vec<RecoveryShareRecord>) -> Result<()> {
        let _guard = self.lock()?;
        Self::write_json_atomic(
            &self.file_for(SHARES_DIR, wallet_id),
            &sorted_by_index(records),
        )
    }

    fn share_set(&self, wallet_id: &str) -> Result<Vec<RecoveryShareRecord>> {
        Self::read_json(&self.file_for(SHARES_DIR, wallet_id))
    }

    fn share(&self, id: Uuid) -> Result<Option<RecoveryShareRecord>> {
        for path in self.all_share_files()? {
            let records: Vec<RecoveryShareRecord> = Self::read_json(&path)?;
            if let Some(found) = records.into_iter().find(|r| r.id == id) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn update_share(&self, record: &RecoveryShareRecord) -> Result<bool> {
        let _guard = self.lock()?;
        let path = self.file_for(SHARES_DIR, &record.wallet_id);
        let mut records: Vec<RecoveryShareRecord> = Self::read_json(&path)?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record.clone(),
            None => return Ok(false),
        }
        Self::write_json_atomic(&path, &records)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::envelope::EncryptedPayload;
    use crate::records::RecoveryType;

    fn payload(tag: &str) -> EncryptedPayload {
        EncryptedPayload {
            key_version: 1,
            data: tag.to_string(),
        }
    }

    fn share_record(wallet: &str, index: u32, total: u32) -> RecoveryShareRecord {
        let now = Utc::now();
        RecoveryShareRecord {
            id: Uuid::new_v4(),
            wallet_id: wallet.to_string(),
            share_set_id: Uuid::nil(),
            share_index: index,
            total_shares: total,
            threshold: 2,
            trustee_id: format!("trustee-{}", index),
            encrypted_share: payload("share"),
            verified: false,
            owner_id: "owner".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn exercise_store(store: &dyn RecoveryStore) {
        // keys: exactly one active
        assert!(store.active_wallet_key("w1").unwrap().is_none());
        let first = WalletKeyRecord::new("w1", "owner", payload("k1"), RecoveryType::Social);
        let second = WalletKeyRecord::new("w1", "owner", payload("k2"), RecoveryType::Social);
        store.activate_wallet_key(first.clone()).unwrap();
        store.activate_wallet_key(second.clone()).unwrap();
        let active = store.active_wallet_key("w1").unwrap().unwrap();
        assert_eq!(active.id, second.id);

        let owned = store.wallet_keys_for_owner("owner").unwrap();
        assert_eq!(owned.len(), 2);
        assert_eq!(owned.iter().filter(|r| r.active).count(), 1);
        assert!(store.wallet_keys_for_owner("nobody").unwrap().is_empty());

        // shares: replace is wholesale, results sorted
        let set = vec![share_record("w1", 2, 2), share_record("w1", 1, 2)];
        store.replace_share_set("w1", set).unwrap();
        let loaded = store.share_set("w1").unwrap();
        assert_eq!(
            loaded.iter().map(|r| r.share_index).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let replacement = vec![share_record("w1", 1, 1)];
        store.replace_share_set("w1", replacement.clone()).unwrap();
        assert_eq!(store.share_set("w1").unwrap(), replacement);
        assert!(store.share(loaded[0].id).unwrap().is_none());

        let mut record = replacement[0].clone();
        assert_eq!(store.share(record.id).unwrap().unwrap(), record);
        record.verified = true;
        assert!(store.update_share(&record).unwrap());
        assert!(store.share(record.id).unwrap().unwrap().verified);

        let missing = share_record("w1", 9, 9);
        assert!(!store.update_share(&missing).unwrap());
        assert!(store.share_set("unknown").unwrap().is_empty());
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryStore::new());
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_file_store_survives_reopen_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::new(dir.path()).unwrap();
            store
                .replace_share_set("0x/../evil", vec![share_record("0x/../evil", 1, 1)])
                .unwrap();
        }
        let store = FileStore::new(dir.path()).unwrap();
        assert_eq!(store.share_set("0x/../evil").unwrap().len(), 1);

        let names: Vec<String> = std::fs::read_dir(dir.path().join(SHARES_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }
}
