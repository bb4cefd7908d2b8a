//! Block headers and partial merkle proofs

use bitcoin::block::{self, Header};
use bitcoin::consensus::encode::{self, deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::merkle_tree::MerkleBlockError;
use bitcoin::{BlockHash, CompactTarget, TxMerkleNode, Txid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Height of a header not yet placed in the chain
pub const UNKNOWN_HEIGHT: u32 = 0xFFFF_FFFF;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Decode error: {0}")]
    Decode(#[from] encode::Error),

    #[error("Invalid merkle proof: {0}")]
    Proof(MerkleBlockError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    hash: BlockHash,
    height: u32,
    version: i32,
    prev_hash: BlockHash,
    merkle_root: TxMerkleNode,
    timestamp: u32,
    bits: u32,
    nonce: u32,
}

impl BlockHeader {
    pub fn new(
        version: i32,
        prev_hash: BlockHash,
        merkle_root: TxMerkleNode,
        timestamp: u32,
        bits: u32,
        nonce: u32,
        height: u32,
    ) -> Self {
        let mut header = Self {
            hash: BlockHash::all_zeros(),
            height,
            version,
            prev_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
        };
        header.hash = header.to_bitcoin().block_hash();
        header
    }

    pub fn from_bitcoin(header: &Header, height: u32) -> Self {
        Self {
            hash: header.block_hash(),
            height,
            version: header.version.to_consensus(),
            prev_hash: header.prev_blockhash,
            merkle_root: header.merkle_root,
            timestamp: header.time,
            bits: header.bits.to_consensus(),
            nonce: header.nonce,
        }
    }

    pub fn to_bitcoin(&self) -> Header {
        Header {
            version: block::Version::from_consensus(self.version),
            prev_blockhash: self.prev_hash,
            merkle_root: self.merkle_root,
            time: self.timestamp,
            bits: CompactTarget::from_consensus(self.bits),
            nonce: self.nonce,
        }
    }

    /// 80-byte wire form.
    pub fn raw(&self) -> Vec<u8> {
        serialize(&self.to_bitcoin())
    }

    pub fn from_raw(raw: &[u8], height: u32) -> Result<Self, BlockError> {
        let header: Header = deserialize(raw)?;
        Ok(Self::from_bitcoin(&header, height))
    }

    pub fn hash(&self) -> &BlockHash {
        &self.hash
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_height(&self) -> bool {
        self.height != UNKNOWN_HEIGHT
    }

    pub fn set_height(&mut self, height: u32) {
        self.height = height;
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn prev_hash(&self) -> &BlockHash {
        &self.prev_hash
    }

    pub fn merkle_root(&self) -> &TxMerkleNode {
        &self.merkle_root
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }
}

/// Header plus a BIP-37 partial merkle tree.
///
/// The header is carried by value; relating it to a stored header is up to
/// the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleBlock {
    header: BlockHeader,
    tx_count: u32,
    hashes: Vec<TxMerkleNode>,
    /// Flag bits packed least significant bit first
    flags: Vec<u8>,
}

impl MerkleBlock {
    pub fn new(header: BlockHeader, tx_count: u32, hashes: Vec<TxMerkleNode>, flags: Vec<u8>) -> Self {
        Self {
            header,
            tx_count,
            hashes,
            flags,
        }
    }

    pub fn from_bitcoin(merkle_block: &bitcoin::MerkleBlock, height: u32) -> Self {
        let bits = merkle_block.txn.bits();
        let mut flags = vec![0u8; bits.len().div_ceil(8)];
        for (i, bit) in bits.iter().enumerate() {
            flags[i / 8] |= (*bit as u8) << (i % 8);
        }
        Self {
            header: BlockHeader::from_bitcoin(&merkle_block.header, height),
            tx_count: merkle_block.txn.num_transactions(),
            hashes: merkle_block.txn.hashes().clone(),
            flags,
        }
    }

    pub fn to_bitcoin(&self) -> Result<bitcoin::MerkleBlock, BlockError> {
        Ok(deserialize(&self.raw())?)
    }

    /// Wire form: header, tx count, hashes, flag bytes.
    pub fn raw(&self) -> Vec<u8> {
        let mut raw = self.header.raw();
        raw.extend(serialize(&self.tx_count));
        raw.extend(serialize(&self.hashes));
        raw.extend(serialize(&self.flags));
        raw
    }

    pub fn from_raw(raw: &[u8], height: u32) -> Result<Self, BlockError> {
        let merkle_block: bitcoin::MerkleBlock = deserialize(raw)?;
        Ok(Self::from_bitcoin(&merkle_block, height))
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut BlockHeader {
        &mut self.header
    }

    pub fn tx_count(&self) -> u32 {
        self.tx_count
    }

    pub fn hashes(&self) -> &[TxMerkleNode] {
        &self.hashes
    }

    pub fn flags(&self) -> &[u8] {
        &self.flags
    }

    /// Verify the proof against the header's merkle root and return the
    /// matched txids in tree order.
    pub fn matched_txids(&self) -> Result<Vec<Txid>, BlockError> {
        let merkle_block = self.to_bitcoin()?;
        let mut matches = Vec::new();
        let mut indexes = Vec::new();
        merkle_block
            .extract_matches(&mut matches, &mut indexes)
            .map_err(BlockError::Proof)?;
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::constants::genesis_block;
    use bitcoin::merkle_tree::calculate_root;
    use bitcoin::Network;

    const GENESIS_HASH: &str = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";

    fn txids(n: u8) -> Vec<Txid> {
        (1..=n).map(|i| Txid::from_byte_array([i; 32])).collect()
    }

    fn proof_block(txids: &[Txid], wanted: &[Txid]) -> bitcoin::MerkleBlock {
        let root = calculate_root(txids.iter().map(|t| TxMerkleNode::from_raw_hash(t.to_raw_hash())))
            .unwrap();
        let header = BlockHeader::new(1, BlockHash::all_zeros(), root, 1_600_000_000, 0x207f_ffff, 7, 10);
        bitcoin::MerkleBlock::from_header_txids_with_predicate(&header.to_bitcoin(), txids, |t| {
            wanted.contains(t)
        })
    }

    #[test]
    fn test_genesis_header() {
        let genesis = genesis_block(Network::Bitcoin).header;
        let header = BlockHeader::from_bitcoin(&genesis, 0);
        assert_eq!(header.hash().to_string(), GENESIS_HASH);
        assert_eq!(header.raw().len(), 80);

        let parsed = BlockHeader::from_raw(&header.raw(), 0).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.to_bitcoin(), genesis);
    }

    #[test]
    fn test_new_computes_hash() {
        let genesis = genesis_block(Network::Bitcoin).header;
        let header = BlockHeader::new(
            genesis.version.to_consensus(),
            genesis.prev_blockhash,
            genesis.merkle_root,
            genesis.time,
            genesis.bits.to_consensus(),
            genesis.nonce,
            UNKNOWN_HEIGHT,
        );
        assert_eq!(header.hash().to_string(), GENESIS_HASH);
        assert!(!header.has_height());
    }

    #[test]
    fn test_merkle_block_wire_form() {
        let all = txids(5);
        let bmb = proof_block(&all, &all[1..3]);
        let mb = MerkleBlock::from_bitcoin(&bmb, 10);

        assert_eq!(mb.raw(), serialize(&bmb));
        assert_eq!(mb.tx_count(), 5);
        assert_eq!(MerkleBlock::from_raw(&mb.raw(), 10).unwrap(), mb);
        assert_eq!(mb.header().height(), 10);
    }

    #[test]
    fn test_matched_txids() {
        let all = txids(7);
        let wanted = vec![all[0], all[4]];
        let mb = MerkleBlock::from_bitcoin(&proof_block(&all, &wanted), 10);
        assert_eq!(mb.matched_txids().unwrap(), wanted);
    }

    #[test]
    fn test_bad_root_is_rejected() {
        let all = txids(4);
        let bmb = proof_block(&all, &all[..1]);
        let mut mb = MerkleBlock::from_bitcoin(&bmb, 10);
        let forged = BlockHeader::new(1, BlockHash::all_zeros(), TxMerkleNode::all_zeros(), 0, 0x207f_ffff, 0, 10);
        *mb.header_mut() = forged;
        assert!(matches!(mb.matched_txids(), Err(BlockError::Proof(_))));
    }

    #[test]
    fn test_truncated_raw_fails() {
        assert!(matches!(
            BlockHeader::from_raw(&[0u8; 40], 0),
            Err(BlockError::Decode(_))
        ));
    }
}
