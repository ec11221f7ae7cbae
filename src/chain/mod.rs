//! Chain management
//!
//! The [`engine`] decides which chain of blocks is the best one and keeps
//! the wallet reconciled with it; the [`store`] persists block records.

pub mod engine;
pub mod store;

pub use engine::{BlockDisposition, ChainEngine, ChainError, VerificationError};
pub use store::{BlockStore, MemoryBlockStore, StoreError, StoredBlock};
