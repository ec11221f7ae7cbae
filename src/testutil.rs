//! Shared test helpers

use crate::core::{Transaction, TransactionInput, TransactionOutput};
use rand::Rng;

/// A transaction paying `amount` to `to` from an input the wallet has
/// never seen, so only the output side is relevant.
pub(crate) fn fake_tx(to: &str, amount: u64) -> Transaction {
    let mut prev = [0u8; 32];
    rand::thread_rng().fill(&mut prev);
    Transaction::new(
        vec![TransactionInput {
            tx_id: hex::encode(prev),
            output_index: 0,
            signature: String::new(),
            public_key: String::new(),
        }],
        vec![TransactionOutput {
            amount,
            recipient: to.to_string(),
        }],
    )
}
