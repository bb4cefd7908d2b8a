//! In-memory repository
//!
//! Every object lives in an arena keyed by its id. Ids come from one counter
//! shared by all kinds, starting at 1, and are never reused.
//!
//! Inserting a transaction also maintains the graph around it:
//! - outputs paying to a stored signing script are tagged with the script,
//!   its account and CREDIT or CHANGE;
//! - when the transaction spends outputs of the wallet, its other outputs are
//!   tagged DEBIT and the fee is recorded if every input is known;
//! - spent outputs point back at the spending input, in both insert orders;
//! - conflicting unconfirmed transactions are marked CONFLICTED.

use bitcoin::{BlockHash, OutPoint, Txid};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use coindb_core::{
    Account, AccountId, BlockHeader, InputRef, Keychain, KeychainId, KeychainResolver,
    MerkleBlock, Repository, ScriptId, ScriptStatus, SigningScript, StatusFlag, Tx, TxId,
    TxOutType, TxStatus, CHANGE_BIN, DEFAULT_UNUSED_POOL_SIZE,
};

use crate::config::StoreConfig;
use crate::StoreError;

/// Statuses a transaction can be moved to CONFLICTED from
const PENDING: &[TxStatus] = &[TxStatus::Unsent, TxStatus::Sent, TxStatus::Received];

/// Statuses whose spends do not count
const DEAD: &[TxStatus] = &[TxStatus::Unsigned, TxStatus::Conflicted, TxStatus::Canceled];

#[derive(Debug)]
pub struct MemoryRepository {
    pub(crate) next_id: u64,
    pub(crate) default_pool_size: u32,
    pub(crate) keychains: BTreeMap<KeychainId, Keychain>,
    pub(crate) accounts: BTreeMap<AccountId, Account>,
    pub(crate) scripts: BTreeMap<ScriptId, SigningScript>,
    pub(crate) headers: BTreeMap<BlockHash, BlockHeader>,
    pub(crate) merkle_blocks: Vec<MerkleBlock>,
    pub(crate) txs: BTreeMap<TxId, Tx>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            default_pool_size: DEFAULT_UNUSED_POOL_SIZE,
            keychains: BTreeMap::new(),
            accounts: BTreeMap::new(),
            scripts: BTreeMap::new(),
            headers: BTreeMap::new(),
            merkle_blocks: Vec::new(),
            txs: BTreeMap::new(),
        }
    }

    /// Load the configured snapshot, or start empty when there is none.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut repo = Self::load(&config.snapshot_path())?;
        repo.default_pool_size = config.wallet.unused_pool_size;
        Ok(repo)
    }

    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.default_pool_size = size;
        self
    }

    /// Look-ahead given to accounts created with [`Self::create_account`].
    pub fn default_pool_size(&self) -> u32 {
        self.default_pool_size
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ---- Iteration ----

    pub fn keychains(&self) -> impl Iterator<Item = &Keychain> {
        self.keychains.values()
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn signing_scripts(&self, account: AccountId) -> impl Iterator<Item = &SigningScript> {
        self.scripts.values().filter(move |s| s.account() == account)
    }

    pub fn block_headers(&self) -> impl Iterator<Item = &BlockHeader> {
        self.headers.values()
    }

    pub fn merkle_blocks(&self) -> &[MerkleBlock] {
        &self.merkle_blocks
    }

    pub fn txs(&self) -> impl Iterator<Item = &Tx> {
        self.txs.values()
    }

    // ---- Keychains ----

    /// Unlock the chain code and, for private keychains, the private key.
    pub fn unlock_keychain(&mut self, id: KeychainId, lock_key: &[u8]) -> Result<(), StoreError> {
        let keychain = self
            .keychains
            .get_mut(&id)
            .ok_or(StoreError::DanglingKeychain(id))?;
        keychain.unlock_chain_code(lock_key)?;
        if keychain.is_private() {
            keychain.unlock_private_key(lock_key)?;
        }
        log::info!("Unlocked {}", id);
        Ok(())
    }

    pub fn lock_all_keychains(&mut self) {
        for keychain in self.keychains.values_mut() {
            keychain.lock_all();
        }
    }

    // ---- Accounts and scripts ----

    /// Create an account with the change and default bins, store it and fill
    /// its look-ahead.
    pub fn create_account(
        &mut self,
        name: &str,
        minsigs: u32,
        keychains: impl IntoIterator<Item = KeychainId>,
    ) -> Result<AccountId, StoreError> {
        let time_created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut account = Account::new(
            name,
            minsigs,
            keychains,
            self.default_pool_size,
            time_created,
        )?;
        account.add_bin("change")?;
        account.add_bin("default")?;

        let id = self.insert_account(account)?;
        self.fill_lookahead(id)?;
        Ok(id)
    }

    /// Issue and store the next script of an account bin.
    pub fn issue_signing_script(
        &mut self,
        account: AccountId,
        bin_index: u32,
        label: &str,
    ) -> Result<ScriptId, StoreError> {
        coindb_core::issue_signing_script(self, account, bin_index, label)
    }

    pub fn unused_script_count(&self, account: AccountId, bin_index: u32) -> u32 {
        self.signing_scripts(account)
            .filter(|s| s.bin_index() == bin_index && s.status() == ScriptStatus::Unused)
            .count() as u32
    }

    /// Top up every bin of the account to its unused pool size.
    ///
    /// Returns the number of scripts issued.
    pub fn fill_lookahead(&mut self, account_id: AccountId) -> Result<usize, StoreError> {
        let account = self
            .accounts
            .get(&account_id)
            .ok_or(StoreError::DanglingAccount(account_id))?;
        let pool = account.unused_pool_size();
        let bins: Vec<u32> = account.bins().iter().map(|b| b.index()).collect();

        let mut issued = 0;
        for bin in bins {
            let unused = self.unused_script_count(account_id, bin);
            for _ in unused..pool {
                self.issue_signing_script(account_id, bin, "")?;
                issued += 1;
            }
        }
        if issued > 0 {
            log::info!("Issued {} look-ahead scripts for {}", issued, account_id);
        }
        Ok(issued)
    }

    /// Value of the account's live, unspent outputs.
    pub fn balance(&self, account: AccountId) -> u64 {
        self.txs
            .values()
            .filter(|tx| !tx.status().matches_any(DEAD))
            .flat_map(|tx| tx.txouts())
            .filter(|txout| {
                txout.account() == Some(account)
                    && txout.kind().matches_any(&[TxOutType::Credit, TxOutType::Change])
            })
            .filter(|txout| match txout.spent() {
                Some(input) => self
                    .txs
                    .get(&input.tx)
                    .map_or(true, |spender| spender.status().matches_any(DEAD)),
                None => true,
            })
            .map(|txout| txout.value())
            .sum()
    }

    // ---- Transactions ----

    /// Move a stored transaction to `status` and update its neighbours.
    pub fn set_tx_status(&mut self, id: TxId, status: TxStatus) -> Result<(), StoreError> {
        let tx = self.txs.get_mut(&id).ok_or(StoreError::DanglingTx(id))?;
        tx.set_status(status)?;
        self.link_spends(id);
        self.mark_conflicts(id);
        Ok(())
    }

    /// Record that a stored transaction is at `index` of a stored block.
    pub fn confirm_tx(&mut self, id: TxId, block: &BlockHash, index: u32) -> Result<(), StoreError> {
        let header = self
            .headers
            .get(block)
            .cloned()
            .ok_or(StoreError::DanglingBlock(*block))?;
        let tx = self.txs.get_mut(&id).ok_or(StoreError::DanglingTx(id))?;
        tx.set_status(TxStatus::Confirmed)?;
        tx.set_block(&header, index);
        log::info!("{} confirmed at height {}", id, header.height());
        self.link_spends(id);
        self.mark_conflicts(id);
        Ok(())
    }

    /// Owning account of a wallet output, by outpoint.
    fn owned_output(&self, outpoint: &OutPoint) -> Option<AccountId> {
        self.tx_by_hash(&outpoint.txid)
            .and_then(|tx| tx.txouts().get(outpoint.vout as usize))
            .filter(|txout| txout.kind().matches_any(&[TxOutType::Credit, TxOutType::Change]))
            .and_then(|txout| txout.account())
    }

    fn output_value(&self, outpoint: &OutPoint) -> Option<u64> {
        self.tx_by_hash(&outpoint.txid)
            .and_then(|tx| tx.txouts().get(outpoint.vout as usize))
            .map(|txout| txout.value())
    }

    fn tx_by_hash(&self, hash: &Txid) -> Option<&Tx> {
        self.txs.values().find(|tx| tx.hash() == Some(hash))
    }

    fn tag_outputs(&self, tx: &mut Tx) {
        let debit_account = tx.outpoints().find_map(|op| self.owned_output(op));

        for index in 0..tx.txouts().len() {
            let owner = self
                .signing_script_by_txoutscript(tx.txouts()[index].script().as_bytes())
                .map(|s| (s.id(), s.account(), s.bin_index()));
            let Some(txout) = tx.txout_mut(index) else {
                continue;
            };
            match owner {
                Some((script, account, bin_index)) => {
                    txout.set_signing_script(script);
                    txout.set_account(Some(account));
                    txout.set_kind(if bin_index == CHANGE_BIN {
                        TxOutType::Change
                    } else {
                        TxOutType::Credit
                    });
                }
                None => {
                    if let Some(account) = debit_account {
                        txout.set_account(Some(account));
                        txout.set_kind(TxOutType::Debit);
                    }
                }
            }
        }

        if !tx.have_fee() && !tx.txins().is_empty() {
            let inputs: Option<Vec<u64>> = tx.outpoints().map(|op| self.output_value(op)).collect();
            if let Some(inputs) = inputs {
                let total_in: u64 = inputs.iter().sum();
                let total_out: u64 = tx.txouts().iter().map(|txout| txout.value()).sum();
                if let Some(fee) = total_in.checked_sub(total_out) {
                    tx.set_fee(fee);
                }
            }
        }
    }

    /// Point spent outputs at their spending inputs, in both directions.
    fn link_spends(&mut self, id: TxId) {
        let Some(tx) = self.txs.get(&id) else {
            return;
        };
        let spends: Vec<(OutPoint, InputRef)> = tx
            .txins()
            .iter()
            .map(|txin| {
                let input = InputRef {
                    tx: id,
                    index: txin.txindex(),
                };
                (*txin.outpoint(), input)
            })
            .collect();
        let hash = tx.hash().copied();

        // Outputs of stored transactions this one spends
        for (outpoint, input) in spends {
            let prev = self
                .txs
                .values_mut()
                .find(|t| t.hash() == Some(&outpoint.txid));
            if let Some(txout) = prev.and_then(|t| t.txout_mut(outpoint.vout as usize)) {
                txout.set_spent(Some(input));
            }
        }

        // Stored transactions spending this one
        let Some(hash) = hash else {
            return;
        };
        let mut spenders = Vec::new();
        for other in self.txs.values() {
            let Some(other_id) = other.id() else {
                continue;
            };
            if other_id == id {
                continue;
            }
            for txin in other.txins() {
                if txin.outpoint().txid == hash {
                    let input = InputRef {
                        tx: other_id,
                        index: txin.txindex(),
                    };
                    spenders.push((txin.outpoint().vout, input));
                }
            }
        }
        if let Some(tx) = self.txs.get_mut(&id) {
            for (vout, input) in spenders {
                if let Some(txout) = tx.txout_mut(vout as usize) {
                    txout.set_spent(Some(input));
                }
            }
        }
    }

    /// Mark transactions double-spending with `id` as CONFLICTED.
    ///
    /// A confirmed transaction marks its pending competitors. Two pending
    /// transactions mark each other. Unsigned transactions are never marked.
    fn mark_conflicts(&mut self, id: TxId) {
        let Some(tx) = self.txs.get(&id) else {
            return;
        };
        let status = tx.status();
        let mut marked = Vec::new();
        for other in self.txs.values() {
            let Some(other_id) = other.id() else {
                continue;
            };
            if other_id == id || !tx.conflicts_with(other) {
                continue;
            }
            let other_status = other.status();
            if status == TxStatus::Confirmed {
                if other_status.matches_any(PENDING) {
                    marked.push(other_id);
                }
            } else if other_status == TxStatus::Confirmed {
                if status.matches_any(PENDING) {
                    marked.push(id);
                }
            } else if status.matches_any(PENDING) {
                if other_status.matches_any(PENDING) {
                    marked.push(other_id);
                }
                if other_status.matches_any(PENDING) || other_status == TxStatus::Conflicted {
                    marked.push(id);
                }
            }
        }

        marked.sort();
        marked.dedup();
        for tx_id in marked {
            if let Some(tx) = self.txs.get_mut(&tx_id) {
                match tx.set_status(TxStatus::Conflicted) {
                    Ok(()) => log::warn!("{} ({}) is conflicted", tx_id, tx.unsigned_hash()),
                    Err(e) => log::warn!("Could not mark {} conflicted: {}", tx_id, e),
                }
            }
        }
    }
}

impl KeychainResolver for MemoryRepository {
    fn keychain(&self, id: KeychainId) -> Option<&Keychain> {
        self.keychains.get(&id)
    }
}

impl Repository for MemoryRepository {
    type Error = StoreError;

    fn insert_keychain(&mut self, mut keychain: Keychain) -> Result<KeychainId, StoreError> {
        if let Some(name) = keychain.name() {
            if self.keychain_by_name(name).is_some() {
                return Err(StoreError::Duplicate {
                    kind: "keychain",
                    key: name.to_string(),
                });
            }
        }
        let id = KeychainId(self.take_id());
        keychain.assign_id(id);
        log::debug!("Stored {} {:?}", id, keychain.name());
        self.keychains.insert(id, keychain);
        Ok(id)
    }

    fn keychain_by_name(&self, name: &str) -> Option<&Keychain> {
        self.keychains.values().find(|k| k.name() == Some(name))
    }

    fn keychain_mut(&mut self, id: KeychainId) -> Option<&mut Keychain> {
        self.keychains.get_mut(&id)
    }

    fn insert_account(&mut self, mut account: Account) -> Result<AccountId, StoreError> {
        if self.account_by_name(account.name()).is_some() {
            return Err(StoreError::Duplicate {
                kind: "account",
                key: account.name().to_string(),
            });
        }
        if let Some(missing) = account
            .keychains()
            .iter()
            .find(|id| !self.keychains.contains_key(*id))
        {
            return Err(StoreError::DanglingKeychain(*missing));
        }
        let id = AccountId(self.take_id());
        account.assign_id(id);
        log::debug!("Stored {} {}", id, account.name());
        self.accounts.insert(id, account);
        Ok(id)
    }

    fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    fn account_by_name(&self, name: &str) -> Option<&Account> {
        self.accounts.values().find(|a| a.name() == name)
    }

    fn account_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.accounts.get_mut(&id)
    }

    fn insert_signing_script(&mut self, mut script: SigningScript) -> Result<ScriptId, StoreError> {
        if !self.accounts.contains_key(&script.account()) {
            return Err(StoreError::DanglingAccount(script.account()));
        }
        let id = ScriptId(self.take_id());
        script.assign_id(id);
        self.scripts.insert(id, script);
        Ok(id)
    }

    fn signing_script(&self, id: ScriptId) -> Option<&SigningScript> {
        self.scripts.get(&id)
    }

    fn signing_script_mut(&mut self, id: ScriptId) -> Option<&mut SigningScript> {
        self.scripts.get_mut(&id)
    }

    fn signing_script_by_txoutscript(&self, script: &[u8]) -> Option<&SigningScript> {
        self.scripts
            .values()
            .find(|s| s.txoutscript().as_bytes() == script)
    }

    fn insert_block_header(&mut self, header: BlockHeader) -> Result<(), StoreError> {
        if self.headers.contains_key(header.hash()) {
            return Err(StoreError::Duplicate {
                kind: "block header",
                key: header.hash().to_string(),
            });
        }
        if header.has_height() && self.block_header_at(header.height()).is_some() {
            return Err(StoreError::Duplicate {
                kind: "block height",
                key: header.height().to_string(),
            });
        }
        log::debug!("Stored header {} at {}", header.hash(), header.height());
        self.headers.insert(*header.hash(), header);
        Ok(())
    }

    fn block_header(&self, hash: &BlockHash) -> Option<&BlockHeader> {
        self.headers.get(hash)
    }

    fn block_header_at(&self, height: u32) -> Option<&BlockHeader> {
        self.headers
            .values()
            .find(|h| h.has_height() && h.height() == height)
    }

    fn insert_merkle_block(&mut self, merkle_block: MerkleBlock) -> Result<(), StoreError> {
        let hash = *merkle_block.header().hash();
        if self
            .merkle_blocks
            .iter()
            .any(|mb| *mb.header().hash() == hash)
        {
            return Err(StoreError::Duplicate {
                kind: "merkle block",
                key: hash.to_string(),
            });
        }
        self.merkle_blocks.push(merkle_block);
        Ok(())
    }

    fn insert_tx(&mut self, mut tx: Tx) -> Result<TxId, StoreError> {
        if self.tx_by_unsigned_hash(tx.unsigned_hash()).is_some() {
            return Err(StoreError::Duplicate {
                kind: "transaction",
                key: tx.unsigned_hash().to_string(),
            });
        }
        let id = TxId(self.take_id());
        tx.assign_id(id);
        self.tag_outputs(&mut tx);
        log::debug!(
            "Stored {} {} ({})",
            id,
            tx.unsigned_hash(),
            tx.status().label()
        );
        self.txs.insert(id, tx);

        self.link_spends(id);
        self.mark_conflicts(id);
        Ok(id)
    }

    fn tx(&self, id: TxId) -> Option<&Tx> {
        self.txs.get(&id)
    }

    fn tx_mut(&mut self, id: TxId) -> Option<&mut Tx> {
        self.txs.get_mut(&id)
    }

    fn tx_by_unsigned_hash(&self, hash: &Txid) -> Option<&Tx> {
        self.txs.values().find(|tx| tx.unsigned_hash() == hash)
    }
}
