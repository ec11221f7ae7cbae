//! Wallet: key management and best-chain transaction reconciliation

pub mod events;
pub mod wallet;

pub use events::WalletListeners;
pub use wallet::{BalanceType, BlockKind, Pool, Wallet, WalletError, WalletTx};
