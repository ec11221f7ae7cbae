//! Transaction handling
//!
//! A simplified UTXO transaction model: ordered inputs referencing prior
//! outputs, ordered outputs carrying a value and a recipient address.
//! The chain core only validates what it needs to track a wallet's own
//! balance; full transaction-graph validation is out of scope.

use crate::crypto::{sha256, sha256_hex, KeyError, KeyPair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current transaction version
pub const TX_VERSION: u32 = 1;

/// Transaction-related errors
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Input index {0} out of range")]
    InputOutOfRange(usize),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

/// Transaction input (reference to a previous output plus unlocking proof)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionInput {
    /// Transaction ID of the previous transaction
    pub tx_id: String,
    /// Index of the output in the previous transaction
    pub output_index: u32,
    /// Signature proving ownership (hex, compact ECDSA)
    pub signature: String,
    /// Public key of the spender (hex, compressed)
    pub public_key: String,
}

impl TransactionInput {
    /// The outpoint this input consumes
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            tx_id: self.tx_id.clone(),
            index: self.output_index,
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionOutput {
    /// Amount of coins
    pub amount: u64,
    /// Recipient's address
    pub recipient: String,
}

impl TransactionOutput {
    /// Check if this output pays the given address
    pub fn is_owned_by(&self, address: &str) -> bool {
        self.recipient == address
    }
}

/// A reference to a single transaction output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_id: String,
    pub index: u32,
}

/// A blockchain transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction version (for future upgrades)
    pub version: u32,
    /// Unique transaction ID (hash of transaction data)
    pub id: String,
    /// Transaction inputs
    pub inputs: Vec<TransactionInput>,
    /// Transaction outputs
    pub outputs: Vec<TransactionOutput>,
    /// Timestamp of transaction creation
    pub timestamp: DateTime<Utc>,
    /// Whether this is a coinbase (block reward) transaction
    pub is_coinbase: bool,
}

impl Transaction {
    /// Create a new unsigned transaction
    pub fn new(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Self {
        let mut tx = Self {
            version: TX_VERSION,
            id: String::new(),
            inputs,
            outputs,
            timestamp: Utc::now(),
            is_coinbase: false,
        };
        tx.id = tx.calculate_hash();
        tx
    }

    /// Create a coinbase (block reward) transaction. The full `extra`
    /// value is recorded in the null input's signature slot so sibling
    /// coinbases to the same address hash differently.
    pub fn coinbase(recipient: &str, amount: u64, extra: u64) -> Self {
        let outputs = vec![TransactionOutput {
            amount,
            recipient: recipient.to_string(),
        }];
        let inputs = vec![TransactionInput {
            tx_id: "0".repeat(64),
            output_index: u32::MAX,
            signature: extra.to_string(),
            public_key: String::new(),
        }];

        let mut tx = Self {
            version: TX_VERSION,
            id: String::new(),
            inputs,
            outputs,
            timestamp: Utc::now(),
            is_coinbase: true,
        };
        tx.id = tx.calculate_hash();
        tx
    }

    /// Calculate the transaction hash
    pub fn calculate_hash(&self) -> String {
        let data = format!(
            "{}{:?}{:?}{}{}",
            self.version, self.inputs, self.outputs, self.timestamp, self.is_coinbase
        );
        sha256_hex(data.as_bytes())
    }

    /// The data each input signature commits to. Input fields are excluded
    /// so signing one input does not invalidate another.
    pub fn signing_data(&self) -> Vec<u8> {
        let data = format!(
            "{}{:?}{}{}",
            self.version, self.outputs, self.timestamp, self.is_coinbase
        );
        sha256(data.as_bytes())
    }

    /// Sign a single input with the provided key pair. The caller is
    /// responsible for refreshing `id` once all inputs are signed.
    pub fn sign_input(&mut self, index: usize, key_pair: &KeyPair) -> Result<(), TransactionError> {
        let signing_data = self.signing_data();
        let input = self
            .inputs
            .get_mut(index)
            .ok_or(TransactionError::InputOutOfRange(index))?;
        input.signature = hex::encode(key_pair.sign(&signing_data)?);
        input.public_key = key_pair.public_key_hex();
        Ok(())
    }

    /// Verify every input signature against its embedded public key
    pub fn verify_signatures(&self) -> Result<bool, TransactionError> {
        if self.is_coinbase {
            return Ok(true);
        }

        let signing_data = self.signing_data();
        for input in &self.inputs {
            if input.signature.is_empty() || input.public_key.is_empty() {
                return Ok(false);
            }
            let public_key = crate::crypto::public_key_from_hex(&input.public_key)?;
            let signature =
                hex::decode(&input.signature).map_err(|_| KeyError::InvalidSignature)?;
            if !crate::crypto::verify_signature(&public_key, &signing_data, &signature)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sum of all output values
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}
