//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 hashing (block and transaction identities)
//! - ECDSA key management (secp256k1)
//! - Merkle root calculation

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{double_sha256, double_sha256_hex, sha256, sha256_hex};
pub use keys::{public_key_from_hex, public_key_to_address, verify_signature, KeyError, KeyPair};
pub use merkle::{calculate_merkle_root, calculate_merkle_root_hex};
