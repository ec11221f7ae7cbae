//! headchain: a lightweight proof-of-work blockchain node library
//!
//! The crate is built around two collaborating pieces:
//! - a chain selection engine that verifies candidate blocks, tracks
//!   every fork, and keeps the head on the chain with the most
//!   cumulative work
//! - a wallet that partitions its transactions into five pools and is
//!   reconciled by the engine whenever the best chain changes
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use headchain::chain::{ChainEngine, MemoryBlockStore};
//! use headchain::crypto::KeyPair;
//! use headchain::params::ChainParams;
//! use headchain::wallet::{BalanceType, Wallet};
//!
//! let params = ChainParams::unit_test();
//!
//! let mut wallet = Wallet::new();
//! let key = KeyPair::generate();
//! let address = key.address();
//! wallet.add_key(key);
//! let wallet = Arc::new(Mutex::new(wallet));
//!
//! let store = Box::new(MemoryBlockStore::new(&params));
//! let engine = ChainEngine::new(params.clone(), store, Arc::clone(&wallet));
//!
//! // Mine a block paying ourselves and feed it to the engine.
//! let block = params.genesis.create_next(&address, params.genesis.header.time + 600);
//! let disposition = engine.add(&block).unwrap();
//! assert!(disposition.is_best_chain());
//! assert_eq!(wallet.lock().balance(BalanceType::Available), 50);
//! ```

pub mod chain;
pub mod core;
pub mod crypto;
pub mod params;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use chain::{BlockDisposition, BlockStore, ChainEngine, ChainError, MemoryBlockStore, StoredBlock};
pub use core::{Block, BlockHeader, Transaction, BLOCK_REWARD};
pub use crypto::KeyPair;
pub use params::ChainParams;
pub use wallet::{BalanceType, BlockKind, Pool, Wallet, WalletError};
