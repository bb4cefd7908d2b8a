//! CoinDB Store
//!
//! In-memory repository for the CoinDB object graph, persisted as a JSON
//! snapshot and configured from a TOML file.
//!
//! # Layout
//!
//! ```text
//! <data_dir>/
//! └── coindb.json     # keychains (sealed secrets only), accounts,
//!                     # scripts, headers, merkle blocks, transactions
//! ```

pub mod config;
pub mod memory;
pub mod snapshot;

pub use config::StoreConfig;
pub use memory::MemoryRepository;
pub use snapshot::{Snapshot, SNAPSHOT_VERSION};

use coindb_core::{AccountError, AccountId, KeychainError, KeychainId, TxError, TxId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("{kind} already stored: {key}")]
    Duplicate { kind: &'static str, key: String },

    #[error("Keychain {0} not found")]
    DanglingKeychain(KeychainId),

    #[error("Account {0} not found")]
    DanglingAccount(AccountId),

    #[error("Transaction {0} not found")]
    DanglingTx(TxId),

    #[error("Block {0} not found")]
    DanglingBlock(bitcoin::BlockHash),

    #[error("Snapshot object has no id: {0}")]
    Unidentified(&'static str),

    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Keychain(#[from] KeychainError),

    #[error(transparent)]
    Tx(#[from] TxError),
}
