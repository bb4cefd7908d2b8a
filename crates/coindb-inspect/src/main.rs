//! CoinDB Inspect: read-only view of a CoinDB snapshot
//!
//! Prints keychains, accounts with their bins and balances, and the stored
//! transactions. Nothing is written back.
//!
//! # Usage
//!
//! ```bash
//! coindb-inspect --config /path/to/coindb.toml
//! coindb-inspect --xpubs      # Also print root extended public keys
//! coindb-inspect --validate   # Validate config and exit
//! ```

use anyhow::{Context, Result};
use coindb_core::{Repository, StatusFlag, Tx, UNKNOWN_TIMESTAMP};
use coindb_store::{MemoryRepository, StoreConfig};
use std::path::PathBuf;

fn main() -> Result<()> {
    // Parse CLI args (minimal, no clap dependency needed)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("/config/coindb.toml");
    let mut validate_only = false;
    let mut show_xpubs = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = PathBuf::from(&args[i]);
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--validate" => {
                validate_only = true;
            }
            "--xpubs" => {
                show_xpubs = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("coindb-inspect {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    // Load config, defaults when there is no file
    let mut config = if config_path.exists() {
        StoreConfig::from_file(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        StoreConfig::default()
    };
    config.apply_env_overrides();
    config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    std::env::set_var("RUST_LOG", &config.store.log_level);
    env_logger::init();

    if validate_only {
        println!("✅ Configuration is valid.");
        println!("  Data dir:      {}", config.store.data_dir.display());
        println!("  Snapshot:      {}", config.snapshot_path().display());
        println!("  Network:       {}", config.wallet.network);
        println!("  Unused pool:   {}", config.wallet.unused_pool_size);
        return Ok(());
    }

    let path = config.snapshot_path();
    let mut repo = MemoryRepository::open(&config)
        .with_context(|| format!("Failed to load snapshot {}", path.display()))?;

    print_keychains(&mut repo, &config, show_xpubs)?;
    print_accounts(&repo)?;
    print_txs(&repo);
    Ok(())
}

fn print_keychains(repo: &mut MemoryRepository, config: &StoreConfig, show_xpubs: bool) -> Result<()> {
    println!("Keychains:");
    let ids: Vec<_> = repo.keychains().filter_map(|k| k.id()).collect();
    let lock_key = std::env::var("COINDB_LOCK_KEY").unwrap_or_default();

    for id in ids {
        let Some(keychain) = repo.keychain_mut(id) else {
            continue;
        };
        let kind = if keychain.is_private() { "private" } else { "watch-only" };
        println!(
            "  {:<12} {:<10} {}  depth {}",
            keychain.name().unwrap_or("-"),
            kind,
            id,
            keychain.depth()
        );
        if !show_xpubs {
            continue;
        }

        keychain.set_network(config.network());
        match keychain.unlock_chain_code(lock_key.as_bytes()) {
            Ok(()) => {
                let xpub = keychain
                    .extended_key(false)
                    .with_context(|| format!("Failed to encode {}", id))?;
                println!("    {}", xpub.as_str());
                keychain.lock_chain_code();
            }
            Err(e) => {
                log::warn!("Cannot unlock chain code of {}: {}", id, e);
                println!("    (chain code locked)");
            }
        }
    }
    Ok(())
}

fn print_accounts(repo: &MemoryRepository) -> Result<()> {
    println!("Accounts:");
    for account in repo.accounts() {
        let info = account
            .info(repo)
            .with_context(|| format!("Account {} is inconsistent", account.name()))?;
        let Some(id) = info.id else {
            continue;
        };
        println!(
            "  {} ({}-of-{}: {})  created {}",
            info.name,
            info.minsigs,
            info.keychain_names.len(),
            info.keychain_names.join(", "),
            format_time(info.time_created)
        );
        println!("    balance  {} sat", repo.balance(id));
        for bin in account.bins() {
            println!(
                "    bin {:<2} {:<10} issued {:<4} unused {}/{}",
                bin.index(),
                bin.name(),
                bin.script_count(),
                repo.unused_script_count(id, bin.index()),
                info.unused_pool_size
            );
        }
    }
    Ok(())
}

fn print_txs(repo: &MemoryRepository) {
    println!("Transactions:");
    let mut txs: Vec<&Tx> = repo.txs().collect();
    txs.sort_by_key(|tx| tx.timestamp());

    for tx in txs {
        let hash = tx
            .hash()
            .map(|h| h.to_string())
            .unwrap_or_else(|| format!("unsigned {}", tx.unsigned_hash()));
        println!("  {}  {}", hash, tx.status().label());

        let time = if tx.timestamp() == UNKNOWN_TIMESTAMP {
            "-".to_string()
        } else {
            format_time(tx.timestamp() as u64)
        };
        let fee = tx
            .fee()
            .map(|f| format!("{} sat", f))
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "    {} in / {} out  fee {}  time {}",
            tx.txins().len(),
            tx.txouts().len(),
            fee,
            time
        );
        if tx.missing_sig_count() > 0 {
            println!("    missing {} signatures", tx.missing_sig_count());
        }
        if let Some(block) = tx.block() {
            println!("    block {} at height {}", block.hash, block.height);
        }
        for txout in tx.txouts() {
            let spent = if txout.spent().is_some() { " spent" } else { "" };
            println!(
                "    #{} {:>12} sat  {}{}",
                txout.txindex(),
                txout.value(),
                txout.kind().label(),
                spent
            );
        }
    }
}

fn format_time(secs: u64) -> String {
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn print_help() {
    println!(
        r#"CoinDB Inspect: read-only view of a CoinDB snapshot

USAGE:
    coindb-inspect [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (default: /config/coindb.toml)
    --xpubs               Print root extended public keys
    --validate            Validate config file and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    COINDB_DATA_DIR           Data directory path
    COINDB_LOG_LEVEL          Log level (error/warn/info/debug/trace)
    COINDB_NETWORK            Bitcoin network (bitcoin/testnet/signet/regtest)
    COINDB_UNUSED_POOL_SIZE   Look-ahead of new accounts
    COINDB_LOCK_KEY           Lock key for --xpubs (default: empty)

EXAMPLES:
    # Summary of the default data directory
    coindb-inspect

    # Testnet keys of a local snapshot
    COINDB_NETWORK=testnet coindb-inspect --config ./coindb.toml --xpubs
"#
    );
}
