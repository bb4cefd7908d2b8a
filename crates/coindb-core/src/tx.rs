//! Transactions, inputs and outputs
//!
//! # Identity
//!
//! A transaction has two hashes:
//!
//! - `unsigned_hash`: txid of the transaction with every input script cleared.
//!   Adding signatures never changes it, so it is the de-duplication key.
//! - `hash`: the ordinary txid, only known once the transaction leaves
//!   [`TxStatus::Unsigned`].
//!
//! # Status
//!
//! ```text
//! UNSIGNED ─▶ UNSENT ─▶ SENT ─▶ RECEIVED ─▶ CONFIRMED
//!                                  │  ▲          │
//!                                  ▼  │          │ reorg
//!                      CONFLICTED, CANCELED      ▼
//!                                             any earlier state
//! ```
//!
//! Moves go towards larger bit values. CONFIRMED may fall back to any state.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{self, deserialize, serialize};
use bitcoin::hashes::Hash as _;
use bitcoin::script::ScriptBuf;
use bitcoin::transaction::Version;
use bitcoin::{Amount, BlockHash, OutPoint, Sequence, Transaction, Txid, Witness};
use rand::seq::SliceRandom;
use rand::Rng;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::block::BlockHeader;
use crate::flags::StatusFlag;
use crate::repository::{AccountId, ScriptId, TxId};
use crate::script::{InputTemplate, ScriptError, ScriptMode};

/// Timestamp of a transaction never stamped
pub const UNKNOWN_TIMESTAMP: u32 = 0xFFFF_FFFF;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("Decode error: {0}")]
    Decode(#[from] encode::Error),

    #[error("Cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: TxStatus, to: TxStatus },

    #[error("Still missing {0} signatures")]
    MissingSignatures(usize),

    #[error("Timestamp is fixed once the transaction is received")]
    TimestampFixed,

    #[error("No input at index {0}")]
    NoSuchInput(usize),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    /// Still missing signatures
    Unsigned,
    /// Signed, not yet broadcast
    Unsent,
    /// Sent to at least one peer
    Sent,
    /// Seen from at least one peer
    Received,
    /// Unconfirmed and spends an output another transaction spends
    Conflicted,
    /// Will never be broadcast or never confirm
    Canceled,
    /// In the chain
    Confirmed,
}

impl StatusFlag for TxStatus {
    const ALL: &'static [Self] = &[
        TxStatus::Unsigned,
        TxStatus::Unsent,
        TxStatus::Sent,
        TxStatus::Received,
        TxStatus::Conflicted,
        TxStatus::Canceled,
        TxStatus::Confirmed,
    ];

    fn bit(self) -> u32 {
        match self {
            TxStatus::Unsigned => 1,
            TxStatus::Unsent => 1 << 1,
            TxStatus::Sent => 1 << 2,
            TxStatus::Received => 1 << 3,
            TxStatus::Conflicted => 1 << 4,
            TxStatus::Canceled => 1 << 5,
            TxStatus::Confirmed => 1 << 6,
        }
    }

    fn label(self) -> &'static str {
        match self {
            TxStatus::Unsigned => "UNSIGNED",
            TxStatus::Unsent => "UNSENT",
            TxStatus::Sent => "SENT",
            TxStatus::Received => "RECEIVED",
            TxStatus::Conflicted => "CONFLICTED",
            TxStatus::Canceled => "CANCELED",
            TxStatus::Confirmed => "CONFIRMED",
        }
    }
}

/// Wallet's view of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxOutType {
    None,
    Change,
    Debit,
    Credit,
}

impl StatusFlag for TxOutType {
    const ALL: &'static [Self] = &[
        TxOutType::None,
        TxOutType::Change,
        TxOutType::Debit,
        TxOutType::Credit,
    ];

    fn bit(self) -> u32 {
        match self {
            TxOutType::None => 1,
            TxOutType::Change => 2,
            TxOutType::Debit => 4,
            TxOutType::Credit => 8,
        }
    }

    fn label(self) -> &'static str {
        match self {
            TxOutType::None => "NONE",
            TxOutType::Change => "CHANGE",
            TxOutType::Debit => "DEBIT",
            TxOutType::Credit => "CREDIT",
        }
    }
}

/// Position of an input in a stored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRef {
    pub tx: TxId,
    pub index: u32,
}

/// Confirmation context of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub hash: BlockHash,
    pub height: u32,
    /// Position within the block
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    outpoint: OutPoint,
    script: ScriptBuf,
    sequence: u32,
    tx: Option<TxId>,
    txindex: u32,
}

impl TxIn {
    pub fn new(outpoint: OutPoint, script: ScriptBuf, sequence: u32) -> Self {
        Self {
            outpoint,
            script,
            sequence,
            tx: None,
            txindex: 0,
        }
    }

    pub fn from_bitcoin(txin: &bitcoin::TxIn) -> Self {
        Self::new(txin.previous_output, txin.script_sig.clone(), txin.sequence.0)
    }

    pub fn to_bitcoin(&self) -> bitcoin::TxIn {
        bitcoin::TxIn {
            previous_output: self.outpoint,
            script_sig: self.script.clone(),
            sequence: Sequence(self.sequence),
            witness: Witness::default(),
        }
    }

    pub fn raw(&self) -> Vec<u8> {
        serialize(&self.to_bitcoin())
    }

    pub fn from_raw(raw: &[u8]) -> Result<Self, TxError> {
        let txin: bitcoin::TxIn = deserialize(raw)?;
        Ok(Self::from_bitcoin(&txin))
    }

    pub fn outpoint(&self) -> &OutPoint {
        &self.outpoint
    }

    pub fn script(&self) -> &ScriptBuf {
        &self.script
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn tx(&self) -> Option<TxId> {
        self.tx
    }

    pub fn txindex(&self) -> u32 {
        self.txindex
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    value: u64,
    script: ScriptBuf,
    tx: Option<TxId>,
    txindex: u32,
    spent: Option<InputRef>,
    signing_script: Option<ScriptId>,
    account: Option<AccountId>,
    kind: TxOutType,
}

impl TxOut {
    pub fn new(value: u64, script: ScriptBuf) -> Self {
        Self {
            value,
            script,
            tx: None,
            txindex: 0,
            spent: None,
            signing_script: None,
            account: None,
            kind: TxOutType::None,
        }
    }

    pub fn from_bitcoin(txout: &bitcoin::TxOut) -> Self {
        Self::new(txout.value.to_sat(), txout.script_pubkey.clone())
    }

    pub fn to_bitcoin(&self) -> bitcoin::TxOut {
        bitcoin::TxOut {
            value: Amount::from_sat(self.value),
            script_pubkey: self.script.clone(),
        }
    }

    pub fn raw(&self) -> Vec<u8> {
        serialize(&self.to_bitcoin())
    }

    pub fn from_raw(raw: &[u8]) -> Result<Self, TxError> {
        let txout: bitcoin::TxOut = deserialize(raw)?;
        Ok(Self::from_bitcoin(&txout))
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn script(&self) -> &ScriptBuf {
        &self.script
    }

    pub fn tx(&self) -> Option<TxId> {
        self.tx
    }

    pub fn txindex(&self) -> u32 {
        self.txindex
    }

    pub fn spent(&self) -> Option<InputRef> {
        self.spent
    }

    pub fn set_spent(&mut self, spent: Option<InputRef>) {
        self.spent = spent;
    }

    pub fn signing_script(&self) -> Option<ScriptId> {
        self.signing_script
    }

    pub fn set_signing_script(&mut self, script: Option<ScriptId>) {
        self.signing_script = script;
    }

    pub fn account(&self) -> Option<AccountId> {
        self.account
    }

    pub fn set_account(&mut self, account: Option<AccountId>) {
        self.account = account;
    }

    pub fn kind(&self) -> TxOutType {
        self.kind
    }

    pub fn set_kind(&mut self, kind: TxOutType) {
        self.kind = kind;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tx {
    id: Option<TxId>,
    /// Empty until the transaction leaves UNSIGNED
    hash: Option<Txid>,
    unsigned_hash: Txid,
    version: i32,
    txins: Vec<TxIn>,
    txouts: Vec<TxOut>,
    locktime: u32,
    timestamp: u32,
    status: TxStatus,
    fee: Option<u64>,
    block: Option<BlockRef>,
}

impl Default for Tx {
    fn default() -> Self {
        Self::new()
    }
}

impl Tx {
    /// Empty version 1 transaction, status RECEIVED, no timestamp.
    pub fn new() -> Self {
        let mut tx = Self {
            id: None,
            hash: None,
            unsigned_hash: Txid::all_zeros(),
            version: 1,
            txins: Vec::new(),
            txouts: Vec::new(),
            locktime: 0,
            timestamp: UNKNOWN_TIMESTAMP,
            status: TxStatus::Received,
            fee: None,
            block: None,
        };
        tx.refresh();
        tx
    }

    pub fn from_bitcoin(tx: &Transaction, timestamp: u32, status: TxStatus) -> Self {
        let mut out = Self::new();
        out.set_bitcoin(tx, timestamp, status);
        out
    }

    pub fn from_raw(raw: &[u8], timestamp: u32, status: TxStatus) -> Result<Self, TxError> {
        let mut out = Self::new();
        out.set_raw(raw, timestamp, status)?;
        Ok(out)
    }

    /// Replace the contents of the transaction.
    ///
    /// `status` is overridden with UNSIGNED while any input lacks signatures.
    pub fn set(
        &mut self,
        version: i32,
        txins: Vec<TxIn>,
        txouts: Vec<TxOut>,
        locktime: u32,
        timestamp: u32,
        status: TxStatus,
    ) {
        self.version = version;
        self.txins = txins;
        self.txouts = txouts;
        self.attach();
        self.locktime = locktime;
        self.timestamp = timestamp;
        self.status = status;
        self.refresh();
    }

    pub fn set_bitcoin(&mut self, tx: &Transaction, timestamp: u32, status: TxStatus) {
        self.set(
            tx.version.0,
            tx.input.iter().map(TxIn::from_bitcoin).collect(),
            tx.output.iter().map(TxOut::from_bitcoin).collect(),
            tx.lock_time.to_consensus_u32(),
            timestamp,
            status,
        );
    }

    /// Legacy wire format.
    pub fn set_raw(&mut self, raw: &[u8], timestamp: u32, status: TxStatus) -> Result<(), TxError> {
        let tx: Transaction = deserialize(raw)?;
        self.set_bitcoin(&tx, timestamp, status);
        Ok(())
    }

    fn attach(&mut self) {
        for (i, txin) in self.txins.iter_mut().enumerate() {
            txin.tx = self.id;
            txin.txindex = i as u32;
        }
        for (i, txout) in self.txouts.iter_mut().enumerate() {
            txout.tx = self.id;
            txout.txindex = i as u32;
        }
    }

    fn refresh(&mut self) {
        self.update_status();
        self.update_unsigned_hash();
        self.update_hash();
    }

    /// Force UNSIGNED while signatures are missing.
    pub fn update_status(&mut self) {
        if self.missing_sig_count() > 0 {
            self.status = TxStatus::Unsigned;
        }
    }

    pub fn update_unsigned_hash(&mut self) {
        let mut tx = self.to_bitcoin();
        for txin in &mut tx.input {
            txin.script_sig = ScriptBuf::new();
        }
        self.unsigned_hash = tx.compute_txid();
    }

    pub fn update_hash(&mut self) {
        self.hash = if self.status == TxStatus::Unsigned {
            None
        } else {
            Some(self.to_bitcoin().compute_txid())
        };
    }

    /// Largest number of signatures any single input still needs.
    pub fn missing_sig_count(&self) -> usize {
        self.txins
            .iter()
            .map(|txin| InputTemplate::classify(&txin.script).sigs_needed())
            .max()
            .unwrap_or(0)
    }

    /// Public keys with an unfilled signature slot, across all inputs.
    pub fn missing_sig_pubkeys(&self) -> BTreeSet<PublicKey> {
        self.txins
            .iter()
            .flat_map(|txin| InputTemplate::classify(&txin.script).missing_sigs())
            .collect()
    }

    /// Put a signature into the multisig template of one input.
    ///
    /// The input switches to its final form once enough signatures are in.
    /// Further signatures for an input that is already complete are refused.
    pub fn add_signature(
        &mut self,
        input: usize,
        pubkey: &PublicKey,
        sig: Vec<u8>,
    ) -> Result<(), TxError> {
        let txin = self.txins.get_mut(input).ok_or(TxError::NoSuchInput(input))?;
        let mut multisig = match InputTemplate::classify(&txin.script) {
            InputTemplate::Multisig(multisig) => multisig,
            _ => return Err(ScriptError::NotMultisig.into()),
        };
        multisig.add_signature(pubkey, sig)?;
        let mode = if multisig.sigs_needed() == 0 {
            ScriptMode::Sign
        } else {
            ScriptMode::Edit
        };
        txin.script = multisig.txinscript(mode)?;
        self.update_unsigned_hash();
        self.update_hash();
        Ok(())
    }

    /// Move to `status`, following the ordering rules.
    pub fn set_status(&mut self, status: TxStatus) -> Result<(), TxError> {
        if status == self.status {
            return Ok(());
        }
        if status != TxStatus::Unsigned {
            let missing = self.missing_sig_count();
            if missing > 0 {
                return Err(TxError::MissingSignatures(missing));
            }
        }
        let reorg = self.status == TxStatus::Confirmed;
        if !reorg && status.bit() < self.status.bit() {
            return Err(TxError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }

        log::debug!(
            "Tx {} {} -> {}",
            self.unsigned_hash,
            self.status.label(),
            status.label()
        );
        if reorg {
            self.block = None;
        }
        self.status = status;
        self.update_hash();
        Ok(())
    }

    /// Rejected once the transaction has been received.
    pub fn set_timestamp(&mut self, timestamp: u32) -> Result<(), TxError> {
        if self.status.bit() >= TxStatus::Received.bit() {
            return Err(TxError::TimestampFixed);
        }
        self.timestamp = timestamp;
        Ok(())
    }

    /// Record confirmation context. Status is left to the caller.
    pub fn set_block(&mut self, header: &BlockHeader, index: u32) {
        self.block = Some(BlockRef {
            hash: *header.hash(),
            height: header.height(),
            index,
        });
    }

    pub fn clear_block(&mut self) {
        self.block = None;
    }

    pub fn shuffle_txins<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.txins.shuffle(rng);
        self.attach();
        self.update_unsigned_hash();
        self.update_hash();
    }

    pub fn shuffle_txouts<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.txouts.shuffle(rng);
        self.attach();
        self.update_unsigned_hash();
        self.update_hash();
    }

    pub fn to_bitcoin(&self) -> Transaction {
        Transaction {
            version: Version(self.version),
            lock_time: LockTime::from_consensus(self.locktime),
            input: self.txins.iter().map(TxIn::to_bitcoin).collect(),
            output: self.txouts.iter().map(TxOut::to_bitcoin).collect(),
        }
    }

    pub fn raw(&self) -> Vec<u8> {
        serialize(&self.to_bitcoin())
    }

    pub fn outpoints(&self) -> impl Iterator<Item = &OutPoint> {
        self.txins.iter().map(|txin| &txin.outpoint)
    }

    /// A different transaction spending one of the same outputs.
    pub fn conflicts_with(&self, other: &Tx) -> bool {
        self.unsigned_hash != other.unsigned_hash
            && self.outpoints().any(|op| other.outpoints().any(|o| o == op))
    }

    pub fn id(&self) -> Option<TxId> {
        self.id
    }

    /// Record the identity assigned by the repository and re-attach children.
    pub fn assign_id(&mut self, id: TxId) {
        self.id = Some(id);
        self.attach();
    }

    pub fn hash(&self) -> Option<&Txid> {
        self.hash.as_ref()
    }

    pub fn unsigned_hash(&self) -> &Txid {
        &self.unsigned_hash
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn txins(&self) -> &[TxIn] {
        &self.txins
    }

    pub fn txouts(&self) -> &[TxOut] {
        &self.txouts
    }

    /// Outputs carry wallet metadata only; values and scripts stay fixed.
    pub fn txout_mut(&mut self, index: usize) -> Option<&mut TxOut> {
        self.txouts.get_mut(index)
    }

    pub fn locktime(&self) -> u32 {
        self.locktime
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn fee(&self) -> Option<u64> {
        self.fee
    }

    pub fn set_fee(&mut self, fee: u64) {
        self.fee = Some(fee);
    }

    pub fn have_fee(&self) -> bool {
        self.fee.is_some()
    }

    pub fn block(&self) -> Option<&BlockRef> {
        self.block.as_ref()
    }
}
