//! Block and block header
//!
//! A header carries the consensus-relevant fields; a block is a header
//! plus its ordered transactions (possibly empty for headers-only use).
//! Headers are immutable once connected to the chain; the mutating
//! helpers here exist so tests and miners can assemble and (re-)solve
//! candidate blocks.

use crate::core::difficulty::{decode_compact, hash_to_int};
use crate::core::transaction::Transaction;
use crate::crypto::{calculate_merkle_root_hex, double_sha256_hex};
use serde::{Deserialize, Serialize};

/// Block reward in coins
pub const BLOCK_REWARD: u64 = 50;

/// Block header containing the consensus fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockHeader {
    /// Header version
    pub version: u32,
    /// Hash of the previous block
    pub previous_hash: String,
    /// Merkle root of all transactions
    pub merkle_root: String,
    /// Block timestamp, seconds since the UNIX epoch
    pub time: u64,
    /// Difficulty target in compact "exponent + mantissa" encoding
    pub bits: u32,
    /// Nonce used for proof of work
    pub nonce: u64,
}

impl BlockHeader {
    /// The header identity: double SHA-256 over the serialized fields
    pub fn hash(&self) -> String {
        let data = format!(
            "{}{}{}{}{}{}",
            self.version, self.previous_hash, self.merkle_root, self.time, self.bits, self.nonce
        );
        double_sha256_hex(data.as_bytes())
    }

    /// Build the next block on top of this header: a single coinbase
    /// paying `to`, the same difficulty bits, solved and ready to add.
    pub fn create_next(&self, to: &str, time: u64) -> Block {
        let coinbase = Transaction::coinbase(to, BLOCK_REWARD, time);
        let mut block = Block::new(self.hash(), vec![coinbase], time, self.bits);
        block.solve();
        block
    }
}

/// A block: header plus ordered transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// Transactions committed to by the header's merkle root
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new unsolved block
    pub fn new(previous_hash: String, transactions: Vec<Transaction>, time: u64, bits: u32) -> Self {
        let merkle_root = Self::compute_merkle_root(&transactions);
        Self {
            header: BlockHeader {
                version: 1,
                previous_hash,
                merkle_root,
                time,
                bits,
                nonce: 0,
            },
            transactions,
        }
    }

    /// The block identity (its header hash)
    pub fn hash(&self) -> String {
        self.header.hash()
    }

    /// Calculate the merkle root over the transactions' IDs
    pub fn compute_merkle_root(transactions: &[Transaction]) -> String {
        let ids: Vec<String> = transactions.iter().map(|tx| tx.id.clone()).collect();
        calculate_merkle_root_hex(&ids)
    }

    /// Append a transaction and refresh the header's merkle root.
    /// Invalidates any previous proof of work; call [`Block::solve`] after.
    pub fn add_transaction(&mut self, tx: Transaction) {
        self.transactions.push(tx);
        self.header.merkle_root = Self::compute_merkle_root(&self.transactions);
    }

    /// Overwrite the header's merkle root without touching the
    /// transactions. Only useful for building deliberately broken blocks.
    pub fn set_merkle_root(&mut self, merkle_root: String) {
        self.header.merkle_root = merkle_root;
    }

    /// Find a nonce satisfying this block's own difficulty target. Leaves
    /// the merkle root untouched. Returns the number of attempts.
    ///
    /// Panics if the difficulty bits are malformed; solving such a block
    /// is a caller bug.
    pub fn solve(&mut self) -> u64 {
        let target = decode_compact(self.header.bits)
            .expect("cannot solve a block with malformed difficulty bits");
        let mut attempts = 0u64;
        loop {
            self.header.nonce = attempts;
            if let Some(h) = hash_to_int(&self.header.hash()) {
                if h <= target {
                    return attempts;
                }
            }
            attempts += 1;
        }
    }

    /// Shorthand for [`BlockHeader::create_next`]
    pub fn create_next(&self, to: &str, time: u64) -> Block {
        self.header.create_next(to, time)
    }

    /// Verify the header's merkle root against the transactions
    pub fn verify_merkle_root(&self) -> bool {
        Self::compute_merkle_root(&self.transactions) == self.header.merkle_root
    }

    /// Number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}
