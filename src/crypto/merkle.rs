//! Merkle root calculation over transaction hashes
//!
//! The merkle root in a block header commits to the ordered list of
//! transactions. Odd levels duplicate their last hash, Bitcoin style.

use super::hash::sha256;

/// Calculate the merkle root from a list of transaction hashes
pub fn calculate_merkle_root(hashes: &[Vec<u8>]) -> Vec<u8> {
    if hashes.is_empty() {
        return sha256(b"");
    }

    if hashes.len() == 1 {
        return hashes[0].clone();
    }

    let mut current_level: Vec<Vec<u8>> = hashes.to_vec();

    while current_level.len() > 1 {
        let mut next_level = Vec::new();

        for chunk in current_level.chunks(2) {
            let combined = if chunk.len() == 2 {
                let mut data = chunk[0].clone();
                data.extend_from_slice(&chunk[1]);
                sha256(&data)
            } else {
                // Duplicate the last hash if odd number
                let mut data = chunk[0].clone();
                data.extend_from_slice(&chunk[0]);
                sha256(&data)
            };
            next_level.push(combined);
        }

        current_level = next_level;
    }

    current_level.remove(0)
}

/// Calculate merkle root from hex-encoded hashes
pub fn calculate_merkle_root_hex(hex_hashes: &[String]) -> String {
    let hashes: Vec<Vec<u8>> = hex_hashes
        .iter()
        .filter_map(|h| hex::decode(h).ok())
        .collect();
    hex::encode(calculate_merkle_root(&hashes))
}
