//! Block storage
//!
//! The chain engine speaks to persistence through the [`BlockStore`]
//! trait. A store keeps one record per accepted block (header, height,
//! cumulative chain work) plus a chain-head pointer. It never stores
//! full transaction bodies; the wallet keeps what is relevant to it.
//!
//! Contract: after seeding, `chain_head` always succeeds, and the head
//! pointer only ever names a block that was previously `put`.

use crate::core::difficulty::work_from_bits;
use crate::core::BlockHeader;
use crate::params::ChainParams;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Storage-layer errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Chain head has not been set")]
    HeadNotSet,
    #[error("Store is inconsistent: {0}")]
    Inconsistent(String),
    #[error("Storage backend failure: {0}")]
    Backend(String),
}

/// A block as tracked by the chain: its header plus the chain metadata
/// that makes fork comparison cheap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredBlock {
    /// The block header
    pub header: BlockHeader,
    /// Total work of the chain ending in this block, exact
    pub chain_work: BigUint,
    /// Distance from genesis (genesis is height 0)
    pub height: u64,
}

impl StoredBlock {
    pub fn new(header: BlockHeader, chain_work: BigUint, height: u64) -> Self {
        Self {
            header,
            chain_work,
            height,
        }
    }

    /// Build the record for a block extending `prev`. Returns `None`
    /// when the header's difficulty bits are malformed.
    pub fn build(header: BlockHeader, prev: &StoredBlock) -> Option<Self> {
        let work = work_from_bits(header.bits)?;
        Some(Self {
            header,
            chain_work: &prev.chain_work + work,
            height: prev.height + 1,
        })
    }

    /// The hash identifying this block
    pub fn hash(&self) -> String {
        self.header.hash()
    }
}

/// Persistence interface for block records
pub trait BlockStore: Send {
    /// Save a block record, keyed by its header hash
    fn put(&mut self, block: &StoredBlock) -> Result<(), StoreError>;

    /// Fetch the record for the given header hash, if present
    fn get(&self, hash: &str) -> Result<Option<StoredBlock>, StoreError>;

    /// Whether a record for the given header hash exists
    fn contains(&self, hash: &str) -> Result<bool, StoreError> {
        Ok(self.get(hash)?.is_some())
    }

    /// The head of the best known chain
    fn chain_head(&self) -> Result<StoredBlock, StoreError>;

    /// Move the chain-head pointer. The block must already be stored.
    fn set_chain_head(&mut self, block: &StoredBlock) -> Result<(), StoreError>;
}

/// In-memory block store, seeded with the network's genesis block
pub struct MemoryBlockStore {
    blocks: HashMap<String, StoredBlock>,
    head: String,
}

impl MemoryBlockStore {
    /// Create a store holding only the genesis block, with the head
    /// pointing at it.
    pub fn new(params: &ChainParams) -> Self {
        let header = params.genesis.header.clone();
        let work = work_from_bits(header.bits).expect("genesis difficulty bits are well formed");
        let genesis = StoredBlock::new(header, work, 0);
        let hash = genesis.hash();

        let mut blocks = HashMap::new();
        blocks.insert(hash.clone(), genesis);
        Self { blocks, head: hash }
    }

    /// Number of stored block records
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    fn put(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
        self.blocks.insert(block.hash(), block.clone());
        Ok(())
    }

    fn get(&self, hash: &str) -> Result<Option<StoredBlock>, StoreError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn chain_head(&self) -> Result<StoredBlock, StoreError> {
        self.blocks
            .get(&self.head)
            .cloned()
            .ok_or(StoreError::HeadNotSet)
    }

    fn set_chain_head(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
        let hash = block.hash();
        if !self.blocks.contains_key(&hash) {
            return Err(StoreError::Inconsistent(format!(
                "head {hash} is not in the store"
            )));
        }
        self.head = hash;
        Ok(())
    }
}
