//! Repository contract
//!
//! Objects never hold live references to one another. Owners keep their owned
//! children by value; everything else is an id handed out by the repository on
//! insert and resolved back through it.

use bitcoin::{BlockHash, Txid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::account::{Account, AccountError};
use crate::block::{BlockHeader, MerkleBlock};
use crate::keychain::Keychain;
use crate::signing_script::SigningScript;
use crate::tx::Tx;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $prefix, self.0)
            }
        }
    };
}

define_id!(
    /// Identity of a stored keychain
    KeychainId,
    "keychain"
);
define_id!(
    /// Identity of a stored account
    AccountId,
    "account"
);
define_id!(
    /// Identity of a stored signing script
    ScriptId,
    "script"
);
define_id!(
    /// Identity of a stored transaction
    TxId,
    "tx"
);

/// Read access to keychains by id.
pub trait KeychainResolver {
    fn keychain(&self, id: KeychainId) -> Option<&Keychain>;
}

impl KeychainResolver for [Keychain] {
    fn keychain(&self, id: KeychainId) -> Option<&Keychain> {
        self.iter().find(|k| k.id() == Some(id))
    }
}

impl KeychainResolver for Vec<Keychain> {
    fn keychain(&self, id: KeychainId) -> Option<&Keychain> {
        self.as_slice().keychain(id)
    }
}

impl KeychainResolver for BTreeMap<KeychainId, Keychain> {
    fn keychain(&self, id: KeychainId) -> Option<&Keychain> {
        self.get(&id)
    }
}

/// Storage collaborator: identity assignment, uniqueness and lookups.
///
/// Inserts assign an id to the object and return it. Implementations reject
/// duplicates of every unique key: keychain name, account name, block hash,
/// known block height and transaction unsigned hash.
pub trait Repository: KeychainResolver {
    type Error: std::error::Error;

    fn insert_keychain(&mut self, keychain: Keychain) -> Result<KeychainId, Self::Error>;
    fn keychain_by_name(&self, name: &str) -> Option<&Keychain>;
    fn keychain_mut(&mut self, id: KeychainId) -> Option<&mut Keychain>;

    fn insert_account(&mut self, account: Account) -> Result<AccountId, Self::Error>;
    fn account(&self, id: AccountId) -> Option<&Account>;
    fn account_by_name(&self, name: &str) -> Option<&Account>;
    fn account_mut(&mut self, id: AccountId) -> Option<&mut Account>;

    fn insert_signing_script(&mut self, script: SigningScript) -> Result<ScriptId, Self::Error>;
    fn signing_script(&self, id: ScriptId) -> Option<&SigningScript>;
    fn signing_script_mut(&mut self, id: ScriptId) -> Option<&mut SigningScript>;
    fn signing_script_by_txoutscript(&self, script: &[u8]) -> Option<&SigningScript>;

    fn insert_block_header(&mut self, header: BlockHeader) -> Result<(), Self::Error>;
    fn block_header(&self, hash: &BlockHash) -> Option<&BlockHeader>;
    fn block_header_at(&self, height: u32) -> Option<&BlockHeader>;
    /// Stores the proof; the caller relates its header separately.
    fn insert_merkle_block(&mut self, merkle_block: MerkleBlock) -> Result<(), Self::Error>;

    fn insert_tx(&mut self, tx: Tx) -> Result<TxId, Self::Error>;
    fn tx(&self, id: TxId) -> Option<&Tx>;
    fn tx_mut(&mut self, id: TxId) -> Option<&mut Tx>;
    fn tx_by_unsigned_hash(&self, hash: &Txid) -> Option<&Tx>;
}

/// Issue the next signing script of an account bin and store it.
///
/// The bin's counter only advances when the script was built.
pub fn issue_signing_script<R>(
    repo: &mut R,
    account_id: AccountId,
    bin_index: u32,
    label: &str,
) -> Result<ScriptId, R::Error>
where
    R: Repository,
    R::Error: From<AccountError>,
{
    let account = repo
        .account(account_id)
        .ok_or(AccountError::MissingAccount(account_id))?;
    let bin = account
        .bin(bin_index)
        .ok_or(AccountError::NoSuchBin(bin_index))?;

    // The bin cache is filled on first use from the root keychains
    let roots: Vec<Keychain> = if bin.is_loaded() {
        Vec::new()
    } else {
        account
            .keychains()
            .iter()
            .map(|id| {
                repo.keychain(*id)
                    .cloned()
                    .ok_or(AccountError::MissingKeychain(*id))
            })
            .collect::<Result<_, _>>()?
    };

    let account = repo
        .account_mut(account_id)
        .ok_or(AccountError::MissingAccount(account_id))?;
    let script = account.new_signing_script(bin_index, label, &roots)?;
    log::debug!(
        "Issued script {}/{} for {}",
        bin_index,
        script.index(),
        account_id
    );
    repo.insert_signing_script(script)
}
