//! Wallet event listeners
//!
//! Callbacks the wallet fires as the chain reshapes its view of the
//! world. Handlers run synchronously, in registration order, after the
//! wallet's own state has been fully updated. A handler must not call
//! back into the wallet or the chain engine: both may be locked while
//! it runs.

use crate::core::Transaction;

/// Fired when a confirmed transaction sends value to this wallet.
/// Arguments: the transaction, the available balance before it, and
/// the available balance after.
pub type CoinsReceivedHandler = Box<dyn FnMut(&Transaction, u64, u64) + Send>;

/// Fired when a double spend kills a transaction this wallet tracked.
/// Arguments: the superseded transaction and the one that replaced it.
pub type TransactionDeadHandler = Box<dyn FnMut(&Transaction, &Transaction) + Send>;

/// Fired once per reorganization, after the wallet has reconciled
pub type ReorganizedHandler = Box<dyn FnMut() + Send>;

/// Registered wallet listeners
#[derive(Default)]
pub struct WalletListeners {
    pub(crate) coins_received: Vec<CoinsReceivedHandler>,
    pub(crate) transaction_dead: Vec<TransactionDeadHandler>,
    pub(crate) reorganized: Vec<ReorganizedHandler>,
}

impl WalletListeners {
    pub fn on_coins_received(&mut self, handler: CoinsReceivedHandler) {
        self.coins_received.push(handler);
    }

    pub fn on_transaction_dead(&mut self, handler: TransactionDeadHandler) {
        self.transaction_dead.push(handler);
    }

    pub fn on_reorganized(&mut self, handler: ReorganizedHandler) {
        self.reorganized.push(handler);
    }
}
