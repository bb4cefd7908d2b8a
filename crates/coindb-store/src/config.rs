//! Store configuration, parsed from TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::StoreError;

/// File name of the snapshot inside the data directory
pub const SNAPSHOT_FILE: &str = "coindb.json";

const NETWORKS: &[&str] = &["bitcoin", "testnet", "testnet3", "signet", "regtest"];

/// Top-level store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Where and how the store runs
    #[serde(default)]
    pub store: StoreSection,

    /// Wallet defaults
    #[serde(default)]
    pub wallet: WalletSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Data directory (snapshot file)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSection {
    /// Bitcoin network: "bitcoin", "testnet", "signet", "regtest".
    /// Only selects extended-key version bytes.
    #[serde(default = "default_network")]
    pub network: String,

    /// Look-ahead of accounts created through the store
    #[serde(default = "default_unused_pool_size")]
    pub unused_pool_size: u32,
}

impl Default for WalletSection {
    fn default() -> Self {
        Self {
            network: default_network(),
            unused_pool_size: default_unused_pool_size(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_network() -> String {
    "bitcoin".to_string()
}

fn default_unused_pool_size() -> u32 {
    coindb_core::DEFAULT_UNUSED_POOL_SIZE
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl StoreConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let contents = std::fs::read_to_string(path)?;
        let config: StoreConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `COINDB_DATA_DIR`
    /// - `COINDB_LOG_LEVEL`
    /// - `COINDB_NETWORK`
    /// - `COINDB_UNUSED_POOL_SIZE`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("COINDB_DATA_DIR") {
            self.store.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("COINDB_LOG_LEVEL") {
            self.store.log_level = v;
        }
        if let Ok(v) = std::env::var("COINDB_NETWORK") {
            self.wallet.network = v;
        }
        if let Ok(v) = std::env::var("COINDB_UNUSED_POOL_SIZE") {
            if let Ok(size) = v.parse::<u32>() {
                self.wallet.unused_pool_size = size;
            }
        }
    }

    /// Parse the network string to a `bitcoin::Network`.
    pub fn network(&self) -> bitcoin::Network {
        match self.wallet.network.as_str() {
            "testnet" | "testnet3" => bitcoin::Network::Testnet,
            "signet" => bitcoin::Network::Signet,
            "regtest" => bitcoin::Network::Regtest,
            _ => bitcoin::Network::Bitcoin,
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.store.data_dir.join(SNAPSHOT_FILE)
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !NETWORKS.contains(&self.wallet.network.as_str()) {
            return Err(StoreError::InvalidConfig(format!(
                "wallet.network must be one of {}, got {:?}",
                NETWORKS.join(", "),
                self.wallet.network
            )));
        }
        if self.wallet.unused_pool_size == 0 {
            return Err(StoreError::InvalidConfig(
                "wallet.unused_pool_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
