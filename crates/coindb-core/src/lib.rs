//! CoinDB Core
//!
//! Domain objects of a multisig wallet: HD keychains, accounts and their
//! deterministic signing scripts, block headers and the transaction graph.
//!
//! # Key Tree
//!
//! Root keychains come from entropy or a BIP-39 mnemonic. An account bin at
//! index `b` derives child `b` of every account keychain; signing script `i`
//! of that bin is a P2SH m-of-n over leaf `i` of each child, keys sorted.
//!
//! # Storage
//!
//! Objects refer to each other by typed ids assigned through the
//! [`Repository`] trait. Nothing here performs I/O.
//!
//! # Example
//!
//! ```ignore
//! use coindb_core::{issue_signing_script, Account, Keychain, DEFAULT_BIN};
//!
//! let a = repo.insert_keychain(Keychain::derive_root("a", &entropy_a, b"", b"")?)?;
//! let b = repo.insert_keychain(Keychain::derive_root("b", &entropy_b, b"", b"")?)?;
//! let mut account = Account::with_defaults("joint", 2, [a, b])?;
//! account.add_bin("change")?;
//! account.add_bin("default")?;
//! let account = repo.insert_account(account)?;
//!
//! let script = issue_signing_script(&mut repo, account, DEFAULT_BIN, "invoice 12")?;
//! ```

pub mod account;
pub mod block;
pub mod crypto;
pub mod flags;
pub mod key;
pub mod keychain;
pub mod naming;
pub mod repository;
pub mod script;
pub mod signing_script;
pub mod tx;

pub use account::{
    Account, AccountBin, AccountError, AccountInfo, CHANGE_BIN, DEFAULT_BIN,
    DEFAULT_UNUSED_POOL_SIZE,
};
pub use block::{BlockError, BlockHeader, MerkleBlock, UNKNOWN_HEIGHT};
pub use crypto::{CryptoError, LockScheme, SealedSecret};
pub use flags::StatusFlag;
pub use key::Key;
pub use keychain::{Keychain, KeychainError, LockState};
pub use naming::{validate_name, NameError, RESERVED_PREFIX};
pub use repository::{
    issue_signing_script, AccountId, KeychainId, KeychainResolver, Repository, ScriptId, TxId,
};
pub use script::{InputTemplate, MultisigScript, ScriptError, ScriptMode, MAX_MULTISIG_KEYS};
pub use signing_script::{ScriptStatus, SigningScript};
pub use tx::{
    BlockRef, InputRef, Tx, TxError, TxIn, TxOut, TxOutType, TxStatus, UNKNOWN_TIMESTAMP,
};
