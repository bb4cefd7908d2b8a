//! Multisig accounts and their script bins
//!
//! An [`Account`] is an m-of-n policy over a set of root keychains. Its bins
//! are deterministic buckets: bin `i` derives child `i` of every account
//! keychain, and each signing script of the bin derives one leaf per child at
//! the script's index.
//!
//! ```text
//! root keychain ──child(bin)──▶ bin keychain ──leaf(script)──▶ Key
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::keychain::{Keychain, KeychainError};
use crate::naming::{validate_name, NameError};
use crate::repository::{AccountId, KeychainId, KeychainResolver};
use crate::script::{ScriptError, MAX_MULTISIG_KEYS};
use crate::signing_script::SigningScript;

/// Scripts an account keeps issued but unused, per bin
pub const DEFAULT_UNUSED_POOL_SIZE: u32 = 25;

/// Bin index reserved for change
pub const CHANGE_BIN: u32 = 1;

/// Bin index reserved for the default receiving bin
pub const DEFAULT_BIN: u32 = 2;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Invalid name: {0}")]
    InvalidName(#[from] NameError),

    #[error("An account can use at most {MAX_MULTISIG_KEYS} keychains, got {0}")]
    TooManyKeychains(usize),

    #[error("Minimum signatures {minsigs} exceeds keychain count {keychains}")]
    ThresholdExceedsKeychains { minsigs: u32, keychains: usize },

    #[error("Minimum signatures must be at least 1")]
    ZeroThreshold,

    #[error("Keychain {0} listed twice")]
    DuplicateKeychain(KeychainId),

    #[error("Bin name already used: {0}")]
    DuplicateBin(String),

    #[error("No bin with index {0}")]
    NoSuchBin(u32),

    #[error("Bin {0} is not attached to a stored account")]
    DetachedBin(u32),

    #[error("Bin {0} keychains are not loaded")]
    BinNotLoaded(u32),

    #[error("Keychain {0} not found")]
    MissingKeychain(KeychainId),

    #[error("Account {0} not found")]
    MissingAccount(AccountId),

    #[error(transparent)]
    Keychain(#[from] KeychainError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Immutable summary of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    pub id: Option<AccountId>,
    pub name: String,
    pub minsigs: u32,
    /// Sorted
    pub keychain_names: Vec<String>,
    pub unused_pool_size: u32,
    pub time_created: u64,
    pub bin_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    id: Option<AccountId>,
    name: String,
    minsigs: u32,
    keychains: BTreeSet<KeychainId>,
    unused_pool_size: u32,
    time_created: u64,
    bins: Vec<AccountBin>,
}

impl Account {
    /// Create an unstored account without bins.
    ///
    /// Fails on an invalid name, more than [`MAX_MULTISIG_KEYS`] keychains, a
    /// keychain listed twice, or a `minsigs` of zero or above the keychain
    /// count.
    pub fn new(
        name: &str,
        minsigs: u32,
        keychains: impl IntoIterator<Item = KeychainId>,
        unused_pool_size: u32,
        time_created: u64,
    ) -> Result<Self, AccountError> {
        validate_name(name)?;
        let mut set = BTreeSet::new();
        for id in keychains {
            if !set.insert(id) {
                return Err(AccountError::DuplicateKeychain(id));
            }
        }
        let keychains = set;
        if keychains.len() > MAX_MULTISIG_KEYS {
            return Err(AccountError::TooManyKeychains(keychains.len()));
        }
        if minsigs == 0 {
            return Err(AccountError::ZeroThreshold);
        }
        if minsigs as usize > keychains.len() {
            return Err(AccountError::ThresholdExceedsKeychains {
                minsigs,
                keychains: keychains.len(),
            });
        }

        Ok(Self {
            id: None,
            name: name.to_string(),
            minsigs,
            keychains,
            unused_pool_size,
            time_created,
            bins: Vec::new(),
        })
    }

    /// Default look-ahead, created now.
    pub fn with_defaults(
        name: &str,
        minsigs: u32,
        keychains: impl IntoIterator<Item = KeychainId>,
    ) -> Result<Self, AccountError> {
        Self::new(
            name,
            minsigs,
            keychains,
            DEFAULT_UNUSED_POOL_SIZE,
            current_timestamp(),
        )
    }

    pub fn id(&self) -> Option<AccountId> {
        self.id
    }

    /// Record the identity assigned by the repository and attach the bins.
    pub fn assign_id(&mut self, id: AccountId) {
        self.id = Some(id);
        for bin in &mut self.bins {
            bin.account = Some(id);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), AccountError> {
        validate_name(name)?;
        self.name = name.to_string();
        Ok(())
    }

    pub fn minsigs(&self) -> u32 {
        self.minsigs
    }

    pub fn keychains(&self) -> &BTreeSet<KeychainId> {
        &self.keychains
    }

    pub fn unused_pool_size(&self) -> u32 {
        self.unused_pool_size
    }

    pub fn time_created(&self) -> u64 {
        self.time_created
    }

    pub fn bins(&self) -> &[AccountBin] {
        &self.bins
    }

    pub fn bin_count(&self) -> u32 {
        self.bins.len() as u32
    }

    pub fn bin(&self, index: u32) -> Option<&AccountBin> {
        self.bins.iter().find(|b| b.index == index)
    }

    pub fn bin_mut(&mut self, index: u32) -> Option<&mut AccountBin> {
        self.bins.iter_mut().find(|b| b.index == index)
    }

    pub fn bin_by_name(&self, name: &str) -> Option<&AccountBin> {
        self.bins.iter().find(|b| b.name == name)
    }

    /// Add a bin at the next index, starting from 1.
    pub fn add_bin(&mut self, name: &str) -> Result<&mut AccountBin, AccountError> {
        validate_name(name)?;
        if self.bin_by_name(name).is_some() {
            return Err(AccountError::DuplicateBin(name.to_string()));
        }
        let index = self.bin_count() + 1;
        self.bins.push(AccountBin::new(self.id, index, name));
        log::debug!("Account '{}' added bin '{}' at index {}", self.name, name, index);

        let last = self.bins.len() - 1;
        Ok(&mut self.bins[last])
    }

    /// Build the next signing script of a bin.
    ///
    /// `resolver` supplies the account's root keychains and is only consulted
    /// the first time the bin is used.
    pub fn new_signing_script<R>(
        &mut self,
        bin_index: u32,
        label: &str,
        resolver: &R,
    ) -> Result<SigningScript, AccountError>
    where
        R: KeychainResolver + ?Sized,
    {
        let minsigs = self.minsigs;
        let keychains = &self.keychains;
        let bin = self
            .bins
            .iter_mut()
            .find(|b| b.index == bin_index)
            .ok_or(AccountError::NoSuchBin(bin_index))?;
        bin.load_keychains(keychains, resolver)?;
        bin.new_signing_script(minsigs, label)
    }

    /// Issue scripts until the bin holds `unused_pool_size` unused ones.
    pub fn fill_lookahead<R>(
        &mut self,
        bin_index: u32,
        unused_now: u32,
        resolver: &R,
    ) -> Result<Vec<SigningScript>, AccountError>
    where
        R: KeychainResolver + ?Sized,
    {
        let wanted = self.unused_pool_size.saturating_sub(unused_now);
        (0..wanted)
            .map(|_| self.new_signing_script(bin_index, "", resolver))
            .collect()
    }

    pub fn info<R>(&self, resolver: &R) -> Result<AccountInfo, AccountError>
    where
        R: KeychainResolver + ?Sized,
    {
        let mut keychain_names = self
            .keychains
            .iter()
            .map(|id| {
                resolver
                    .keychain(*id)
                    .map(|k| k.name().unwrap_or_default().to_string())
                    .ok_or(AccountError::MissingKeychain(*id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        keychain_names.sort();

        Ok(AccountInfo {
            id: self.id,
            name: self.name.clone(),
            minsigs: self.minsigs,
            keychain_names,
            unused_pool_size: self.unused_pool_size,
            time_created: self.time_created,
            bin_names: self.bins.iter().map(|b| b.name.clone()).collect(),
        })
    }
}

/// A deterministic script bucket of one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBin {
    account: Option<AccountId>,
    index: u32,
    name: String,
    script_count: u32,
    /// One child per account keychain, filled once
    #[serde(skip)]
    keychains: Option<Vec<Keychain>>,
}

impl AccountBin {
    fn new(account: Option<AccountId>, index: u32, name: &str) -> Self {
        Self {
            account,
            index,
            name: name.to_string(),
            script_count: 0,
            keychains: None,
        }
    }

    pub fn account(&self) -> Option<AccountId> {
        self.account
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index the next script will receive.
    pub fn script_count(&self) -> u32 {
        self.script_count
    }

    pub fn is_loaded(&self) -> bool {
        self.keychains.is_some()
    }

    pub fn keychains(&self) -> Option<&[Keychain]> {
        self.keychains.as_deref()
    }

    /// Derive this bin's child of every account keychain.
    ///
    /// Children are always public; signing keys are re-derived through their
    /// root by [`crate::Key::private_key`]. Once filled the cache is never
    /// replaced. Returns false if already loaded.
    pub fn load_keychains<R>(
        &mut self,
        keychain_ids: &BTreeSet<KeychainId>,
        resolver: &R,
    ) -> Result<bool, AccountError>
    where
        R: KeychainResolver + ?Sized,
    {
        if self.keychains.is_some() {
            return Ok(false);
        }

        let children = keychain_ids
            .iter()
            .map(|id| -> Result<Keychain, AccountError> {
                let root = resolver
                    .keychain(*id)
                    .ok_or(AccountError::MissingKeychain(*id))?;
                Ok(root.derive_child(self.index, false)?)
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("Bin '{}' loaded {} keychains", self.name, children.len());
        self.keychains = Some(children);
        Ok(true)
    }

    /// Build the script at the next index and advance the counter.
    pub fn new_signing_script(
        &mut self,
        minsigs: u32,
        label: &str,
    ) -> Result<SigningScript, AccountError> {
        let account = self.account.ok_or(AccountError::DetachedBin(self.index))?;
        let keychains = self
            .keychains
            .as_deref()
            .ok_or(AccountError::BinNotLoaded(self.index))?;

        let script = SigningScript::derive(
            account,
            self.index,
            self.script_count,
            minsigs,
            keychains,
            label,
        )?;
        self.script_count += 1;
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing_script::ScriptStatus;

    fn roots(n: u8) -> Vec<Keychain> {
        (1..=n)
            .map(|i| {
                let mut k =
                    Keychain::derive_root(&format!("key{}", i), &[i; 32], b"", b"").unwrap();
                k.assign_id(KeychainId(i as u64));
                k
            })
            .collect()
    }

    fn ids(n: u8) -> Vec<KeychainId> {
        (1..=n as u64).map(KeychainId).collect()
    }

    #[test]
    fn test_policy_validation() {
        assert!(matches!(
            Account::new("", 1, ids(2), 25, 0),
            Err(AccountError::InvalidName(NameError::Empty))
        ));
        assert!(matches!(
            Account::new("@acct", 1, ids(2), 25, 0),
            Err(AccountError::InvalidName(NameError::Reserved(_)))
        ));
        assert!(matches!(
            Account::new("big", 1, (1..=16).map(KeychainId), 25, 0),
            Err(AccountError::TooManyKeychains(16))
        ));
        assert!(matches!(
            Account::new("greedy", 3, ids(2), 25, 0),
            Err(AccountError::ThresholdExceedsKeychains {
                minsigs: 3,
                keychains: 2
            })
        ));
        assert!(matches!(
            Account::new("zero", 0, ids(2), 25, 0),
            Err(AccountError::ZeroThreshold)
        ));
        assert!(matches!(
            Account::new(
                "twice",
                2,
                [KeychainId(1), KeychainId(2), KeychainId(1)],
                25,
                0
            ),
            Err(AccountError::DuplicateKeychain(KeychainId(1)))
        ));
        assert!(Account::new("max", 15, (1..=15).map(KeychainId), 25, 0).is_ok());
    }

    #[test]
    fn test_bins_are_numbered_from_one() {
        let mut account = Account::with_defaults("bins", 1, ids(1)).unwrap();
        assert_eq!(account.add_bin("change").unwrap().index(), CHANGE_BIN);
        assert_eq!(account.add_bin("default").unwrap().index(), DEFAULT_BIN);
        assert_eq!(account.add_bin("savings").unwrap().index(), 3);
        assert_eq!(account.bin_count(), 3);
        assert_eq!(account.bin_by_name("default").unwrap().index(), 2);

        assert!(matches!(
            account.add_bin("@hidden"),
            Err(AccountError::InvalidName(_))
        ));
        assert!(matches!(
            account.add_bin("change"),
            Err(AccountError::DuplicateBin(_))
        ));
        assert_eq!(account.bin_count(), 3);
    }

    #[test]
    fn test_assign_id_attaches_bins() {
        let mut account = Account::with_defaults("attach", 1, ids(1)).unwrap();
        account.add_bin("change").unwrap();
        assert_eq!(account.bin(CHANGE_BIN).unwrap().account(), None);
        account.assign_id(AccountId(4));
        assert_eq!(account.bin(CHANGE_BIN).unwrap().account(), Some(AccountId(4)));
        // Bins added later are attached at creation
        assert_eq!(account.add_bin("default").unwrap().account(), Some(AccountId(4)));
    }

    #[test]
    fn test_load_keychains_once() {
        let roots = roots(3);
        let mut account = Account::with_defaults("load", 2, ids(3)).unwrap();
        account.add_bin("change").unwrap();
        let keychains = account.keychains().clone();
        let bin = account.bin_mut(CHANGE_BIN).unwrap();

        assert!(bin.load_keychains(&keychains, &roots).unwrap());
        assert!(!bin.load_keychains(&keychains, &roots).unwrap());
        let children = bin.keychains().unwrap();
        assert_eq!(children.len(), 3);
        for child in children {
            assert_eq!(child.derivation_path(), &[CHANGE_BIN]);
            assert!(!child.is_private());
            assert!(child.root_is_private());
        }
    }

    #[test]
    fn test_cache_outlives_root_locking() {
        let mut roots = roots(2);
        let mut account = Account::with_defaults("cached", 1, ids(2)).unwrap();
        account.assign_id(AccountId(1));
        account.add_bin("change").unwrap();
        let first = account.new_signing_script(CHANGE_BIN, "", &roots).unwrap();

        for root in &mut roots {
            root.lock_all();
        }
        // The cached public children still issue scripts
        let next = account.new_signing_script(CHANGE_BIN, "", &roots).unwrap();
        assert_eq!(next.index(), 1);
        assert!(next.keys().iter().all(|k| k.is_private()));
        assert!(first.keys()[0].private_key(&roots).is_err());
    }

    #[test]
    fn test_locked_roots_yield_public_children() {
        let mut roots = roots(2);
        for root in &mut roots {
            root.lock_private_key();
        }
        let mut account = Account::with_defaults("public", 1, ids(2)).unwrap();
        account.add_bin("change").unwrap();
        let keychains = account.keychains().clone();
        let bin = account.bin_mut(CHANGE_BIN).unwrap();
        bin.load_keychains(&keychains, &roots).unwrap();
        assert!(bin.keychains().unwrap().iter().all(|k| !k.is_private()));
    }

    #[test]
    fn test_missing_keychain_is_reported() {
        let roots = roots(1);
        let mut account = Account::with_defaults("broken", 1, ids(2)).unwrap();
        account.assign_id(AccountId(1));
        account.add_bin("change").unwrap();
        assert!(matches!(
            account.new_signing_script(CHANGE_BIN, "", &roots),
            Err(AccountError::MissingKeychain(KeychainId(2)))
        ));
        // No index was consumed
        assert_eq!(account.bin(CHANGE_BIN).unwrap().script_count(), 0);
    }

    #[test]
    fn test_script_indices_are_sequential() {
        let roots = roots(3);
        let mut account = Account::with_defaults("seq", 2, ids(3)).unwrap();
        account.assign_id(AccountId(1));
        account.add_bin("change").unwrap();
        account.add_bin("default").unwrap();

        let indices: Vec<u32> = (0..5)
            .map(|_| {
                account
                    .new_signing_script(DEFAULT_BIN, "", &roots)
                    .unwrap()
                    .index()
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(account.bin(DEFAULT_BIN).unwrap().script_count(), 5);
        assert_eq!(account.bin(CHANGE_BIN).unwrap().script_count(), 0);
    }

    #[test]
    fn test_detached_bin_rejected() {
        let roots = roots(1);
        let mut account = Account::with_defaults("loose", 1, ids(1)).unwrap();
        account.add_bin("change").unwrap();
        assert!(matches!(
            account.new_signing_script(CHANGE_BIN, "", &roots),
            Err(AccountError::DetachedBin(CHANGE_BIN))
        ));
        assert!(matches!(
            account.new_signing_script(9, "", &roots),
            Err(AccountError::NoSuchBin(9))
        ));
    }

    #[test]
    fn test_fill_lookahead() {
        let roots = roots(2);
        let mut account = Account::new("pool", 1, ids(2), 4, 0).unwrap();
        account.assign_id(AccountId(1));
        account.add_bin("change").unwrap();

        let scripts = account.fill_lookahead(CHANGE_BIN, 1, &roots).unwrap();
        assert_eq!(scripts.len(), 3);
        assert!(scripts.iter().all(|s| s.status() == ScriptStatus::Unused));
        assert!(account.fill_lookahead(CHANGE_BIN, 4, &roots).unwrap().is_empty());
    }

    #[test]
    fn test_info_sorts_keychain_names() {
        let mut roots = roots(3);
        roots[0].set_name("zulu").unwrap();
        roots[2].set_name("alpha").unwrap();
        let mut account = Account::new("info", 2, ids(3), 10, 1_700_000_000).unwrap();
        account.add_bin("change").unwrap();

        let info = account.info(&roots).unwrap();
        assert_eq!(info.keychain_names, vec!["alpha", "key2", "zulu"]);
        assert_eq!(info.bin_names, vec!["change"]);
        assert_eq!(info.minsigs, 2);
        assert_eq!(info.unused_pool_size, 10);
        assert_eq!(info.time_created, 1_700_000_000);
    }
}
