//! Core blockchain components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (simplified UTXO model)
//! - Blocks (header plus transactions, with proof of work)
//! - Difficulty (compact target encoding and chain-work arithmetic)

pub mod block;
pub mod difficulty;
pub mod transaction;

pub use block::{Block, BlockHeader, BLOCK_REWARD};
pub use difficulty::{decode_compact, encode_compact, hash_to_int, work_from_bits};
pub use transaction::{
    OutPoint, Transaction, TransactionError, TransactionInput, TransactionOutput, TX_VERSION,
};
