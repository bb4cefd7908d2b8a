//! JSON snapshot of a [`MemoryRepository`]
//!
//! Unlocked secrets are never written: keychains serialize their sealed
//! forms only, and come back locked.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use coindb_core::{Account, BlockHeader, Keychain, MerkleBlock, SigningScript, Tx};

use crate::memory::MemoryRepository;
use crate::StoreError;

/// Current snapshot layout
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub next_id: u64,
    #[serde(default)]
    pub keychains: Vec<Keychain>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub signing_scripts: Vec<SigningScript>,
    #[serde(default)]
    pub block_headers: Vec<BlockHeader>,
    #[serde(default)]
    pub merkle_blocks: Vec<MerkleBlock>,
    #[serde(default)]
    pub txs: Vec<Tx>,
}

impl Snapshot {
    pub fn capture(repo: &MemoryRepository) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            next_id: repo.next_id,
            keychains: repo.keychains.values().cloned().collect(),
            accounts: repo.accounts.values().cloned().collect(),
            signing_scripts: repo.scripts.values().cloned().collect(),
            block_headers: repo.headers.values().cloned().collect(),
            merkle_blocks: repo.merkle_blocks.clone(),
            txs: repo.txs.values().cloned().collect(),
        }
    }

    /// Rebuild the arenas. Every stored object must carry its id.
    pub fn restore(self) -> Result<MemoryRepository, StoreError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion(self.version));
        }

        let mut repo = MemoryRepository::new();
        let mut max_id = 0;

        for mut keychain in self.keychains {
            let id = keychain.id().ok_or(StoreError::Unidentified("keychain"))?;
            keychain.lock_all();
            max_id = max_id.max(id.0);
            repo.keychains.insert(id, keychain);
        }
        for account in self.accounts {
            let id = account.id().ok_or(StoreError::Unidentified("account"))?;
            max_id = max_id.max(id.0);
            repo.accounts.insert(id, account);
        }
        for script in self.signing_scripts {
            let id = script.id().ok_or(StoreError::Unidentified("signing script"))?;
            if !repo.accounts.contains_key(&script.account()) {
                return Err(StoreError::DanglingAccount(script.account()));
            }
            max_id = max_id.max(id.0);
            repo.scripts.insert(id, script);
        }
        for header in self.block_headers {
            repo.headers.insert(*header.hash(), header);
        }
        repo.merkle_blocks = self.merkle_blocks;
        for tx in self.txs {
            let id = tx.id().ok_or(StoreError::Unidentified("transaction"))?;
            max_id = max_id.max(id.0);
            repo.txs.insert(id, tx);
        }

        repo.next_id = self.next_id.max(max_id + 1);
        Ok(repo)
    }
}

impl MemoryRepository {
    /// Load a snapshot file, or an empty repository if the file is missing.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let snapshot: Snapshot = serde_json::from_str(&contents)?;
            let repo = snapshot.restore()?;
            log::info!(
                "Loaded {} keychains, {} accounts, {} transactions from {}",
                repo.keychains.len(),
                repo.accounts.len(),
                repo.txs.len(),
                path.display()
            );
            Ok(repo)
        } else {
            log::debug!("No snapshot at {}, starting empty", path.display());
            Ok(Self::new())
        }
    }

    /// Save a snapshot file
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&Snapshot::capture(self))?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coindb_core::{AccountId, KeychainId, Repository, DEFAULT_BIN};

    fn locked_repo(lock_key: &[u8]) -> (MemoryRepository, AccountId) {
        let mut repo = MemoryRepository::new().with_pool_size(2);
        let mut ids = Vec::new();
        for (i, name) in ["left", "right"].iter().enumerate() {
            let root = Keychain::derive_root(name, &[i as u8 + 7; 32], lock_key, b"").unwrap();
            ids.push(repo.insert_keychain(root).unwrap());
        }
        let account = repo.create_account("pair", 2, ids).unwrap();
        (repo, account)
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MemoryRepository::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(repo.keychains().count(), 0);
        assert_eq!(repo.next_id, 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("coindb.json");
        let (repo, account) = locked_repo(b"");
        repo.save(&path).unwrap();

        let mut loaded = MemoryRepository::load(&path).unwrap();
        assert_eq!(loaded.next_id, repo.next_id);
        assert_eq!(loaded.signing_scripts(account).count(), 4);
        assert_eq!(loaded.account(account).unwrap().name(), "pair");

        // Keychains come back locked
        for keychain in loaded.keychains() {
            assert!(keychain.is_chain_code_locked());
            assert!(keychain.is_private_key_locked().unwrap());
        }
        // Issuing needs the chain codes
        assert!(loaded.issue_signing_script(account, DEFAULT_BIN, "").is_err());

        let ids: Vec<KeychainId> = loaded.keychains().filter_map(|k| k.id()).collect();
        for id in ids {
            loaded.unlock_keychain(id, b"").unwrap();
        }
        let next = loaded
            .issue_signing_script(account, DEFAULT_BIN, "after reload")
            .unwrap();
        let script = loaded.signing_script(next).unwrap();
        assert_eq!(script.index(), 2);
        assert_eq!(next.0, repo.next_id);
    }

    #[test]
    fn test_secrets_stay_sealed() {
        let (repo, _) = locked_repo(b"correct horse");
        let secrets: Vec<String> = repo
            .keychains()
            .map(|k| k.private_key().unwrap().display_secret().to_string())
            .collect();

        let json = serde_json::to_string(&Snapshot::capture(&repo)).unwrap();
        for secret in secrets {
            assert!(!json.contains(&secret));
        }
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut snapshot = Snapshot::capture(&MemoryRepository::new());
        snapshot.version = 99;
        assert!(matches!(
            snapshot.restore(),
            Err(StoreError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_unidentified_object_rejected() {
        let mut snapshot = Snapshot::capture(&MemoryRepository::new());
        snapshot
            .keychains
            .push(Keychain::derive_root("loose", &[1; 32], b"", b"").unwrap());
        assert!(matches!(
            snapshot.restore(),
            Err(StoreError::Unidentified("keychain"))
        ));
    }
}
