//! Blocks and Merkle commitments
//!
//! A block commits to its ordered transaction list through a pairwise
//! Merkle root and chains to its parent through the block hash. Hashing is
//! over the decimal/textual field concatenation so producer and validator
//! recompute identical digests from the JSON wire form.

use crate::crypto::{hash256, hash256_hex};
use crate::error::ChainError;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// Parent hash of the genesis block, the only block with no parent.
pub const GENESIS_PARENT_HASH: &str = "0x0";

/// Merkle root sentinel for an empty transaction list. Not a hash.
pub const EMPTY_MERKLE_ROOT: &str = "0x0";

/// Address credited when no miner exists (genesis only).
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: String,
    #[serde(rename = "parentHash")]
    pub parent_hash: String,
    pub timestamp: u64,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
    #[serde(rename = "transaction")]
    pub transactions: Vec<Transaction>,
    pub miner: String,
}

/// Computes the Merkle root over `0x`-prefixed transaction hashes.
///
/// Empty list yields the sentinel. A single hash is its own root. For more,
/// each level pairs adjacent hashes left-to-right, duplicating the last one
/// when the count is odd, and hashes `left || right` into the next level.
pub fn merkle_root(tx_hashes: &[String]) -> Result<String, ChainError> {
    if tx_hashes.is_empty() {
        return Ok(EMPTY_MERKLE_ROOT.to_string());
    }

    let mut level: Vec<[u8; 32]> = Vec::with_capacity(tx_hashes.len());
    for tx_hash in tx_hashes {
        let stripped = tx_hash.strip_prefix("0x").unwrap_or(tx_hash);
        let bytes = hex::decode(stripped).map_err(|_| {
            ChainError::InvalidTransaction(format!("invalid transaction hash: {}", tx_hash))
        })?;
        let digest: [u8; 32] = bytes.try_into().map_err(|_| {
            ChainError::InvalidTransaction(format!("invalid transaction hash: {}", tx_hash))
        })?;
        level.push(digest);
    }

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            if let Some(&last) = level.last() {
                level.push(last);
            }
        }

        let mut parents = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks_exact(2) {
            let mut combined = [0u8; 64];
            combined[..32].copy_from_slice(&pair[0]);
            combined[32..].copy_from_slice(&pair[1]);
            parents.push(hash256(&combined));
        }
        level = parents;
    }

    Ok(hex::encode(level[0]))
}

impl Block {
    /// Hash preimage: every header field in its textual form, concatenated.
    /// Producer and validators must agree on these exact bytes.
    pub fn compute_hash(
        number: u64,
        parent_hash: &str,
        merkle_root: &str,
        miner: &str,
        timestamp: u64,
    ) -> String {
        let data = format!(
            "{}{}{}{}{}",
            number, parent_hash, merkle_root, miner, timestamp
        );
        hash256_hex(data.as_bytes())
    }

    /// Assembles and seals a block from its parts: commits to the
    /// transactions through the Merkle root, then hashes the header.
    pub fn assemble(
        number: u64,
        parent_hash: String,
        timestamp: u64,
        transactions: Vec<Transaction>,
        miner: String,
    ) -> Result<Self, ChainError> {
        let tx_hashes: Vec<String> = transactions.iter().map(|tx| tx.hash.clone()).collect();
        let merkle_root = merkle_root(&tx_hashes)?;
        let hash = Self::compute_hash(number, &parent_hash, &merkle_root, &miner, timestamp);

        Ok(Block {
            number,
            hash,
            parent_hash,
            timestamp,
            merkle_root,
            transactions,
            miner,
        })
    }

    /// The one block with no parent. Deterministic across all nodes.
    pub fn genesis() -> Self {
        let hash = Self::compute_hash(1, GENESIS_PARENT_HASH, EMPTY_MERKLE_ROOT, ZERO_ADDRESS, 0);
        Block {
            number: 1,
            hash,
            parent_hash: GENESIS_PARENT_HASH.to_string(),
            timestamp: 0,
            merkle_root: EMPTY_MERKLE_ROOT.to_string(),
            transactions: Vec::new(),
            miner: ZERO_ADDRESS.to_string(),
        }
    }

    /// Recomputes the Merkle root from the carried transactions.
    pub fn expected_merkle_root(&self) -> Result<String, ChainError> {
        let tx_hashes: Vec<String> = self.transactions.iter().map(|tx| tx.hash.clone()).collect();
        merkle_root(&tx_hashes)
    }

    /// Recomputes the block hash from the claimed header fields.
    pub fn expected_hash(&self) -> String {
        Self::compute_hash(
            self.number,
            &self.parent_hash,
            &self.merkle_root,
            &self.miner,
            self.timestamp,
        )
    }
}
