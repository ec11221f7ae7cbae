//! Compact difficulty-target encoding and proof-of-work arithmetic
//!
//! Difficulty targets travel in block headers as a 32-bit compact value:
//! one exponent byte followed by a three-byte mantissa. Cumulative chain
//! work is kept as an exact `BigUint` so that tie-breaking between forks
//! never loses precision.

use num_bigint::BigUint;

/// Decode a compact "exponent + mantissa" difficulty encoding into the
/// full 256-bit target it represents.
///
/// Returns `None` for malformed encodings: a zero mantissa, the sign bit
/// set (negative targets are meaningless), or a target wider than 256 bits.
pub fn decode_compact(bits: u32) -> Option<BigUint> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    if mantissa == 0 || bits & 0x0080_0000 != 0 {
        return None;
    }

    let target = if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3))
    };

    if target == BigUint::default() || target.bits() > 256 {
        return None;
    }
    Some(target)
}

/// Encode a target back into compact form, truncating the mantissa to
/// three bytes the way the wire encoding does.
pub fn encode_compact(target: &BigUint) -> u32 {
    let bytes = target.to_bytes_be();
    if bytes == [0] {
        return 0;
    }

    let mut size = bytes.len() as u32;
    let mut mantissa: u32 = 0;
    for b in bytes.iter().take(3) {
        mantissa = (mantissa << 8) | u32::from(*b);
    }
    if bytes.len() < 3 {
        mantissa <<= 8 * (3 - bytes.len() as u32);
    }
    // A mantissa with its top bit set would read as negative; borrow a byte
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        size += 1;
    }
    mantissa | (size << 24)
}

/// The work-equivalent of a difficulty target: 2^256 / (target + 1).
///
/// Lower targets are harder to meet and therefore represent more work.
/// Returns `None` when the compact encoding is malformed.
pub fn work_from_bits(bits: u32) -> Option<BigUint> {
    let target = decode_compact(bits)?;
    let numerator = BigUint::from(1u8) << 256;
    Some(numerator / (target + BigUint::from(1u8)))
}

/// Interpret a hex block hash as a big-endian unsigned integer for
/// comparison against a target. Returns `None` if the string is not hex.
pub fn hash_to_int(hash_hex: &str) -> Option<BigUint> {
    BigUint::parse_bytes(hash_hex.as_bytes(), 16)
}
