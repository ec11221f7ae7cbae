//! Chain parameters
//!
//! Everything that distinguishes one network from another: the genesis
//! block, the proof-of-work ceiling, and the difficulty retargeting
//! schedule. The chain engine is parameterised over these so tests can
//! run on a network where blocks solve in microseconds.

use crate::core::difficulty::decode_compact;
use crate::core::{Block, Transaction, BLOCK_REWARD};
use num_bigint::BigUint;

/// Compact difficulty ceiling for the main network
const MAIN_POW_LIMIT_BITS: u32 = 0x1f00_ffff;

/// Compact difficulty ceiling for unit tests. Roughly half of all
/// nonces satisfy it, so blocks solve in one or two attempts.
const TEST_POW_LIMIT_BITS: u32 = 0x207f_ffff;

/// Timestamp baked into the genesis block
const GENESIS_TIME: u64 = 1_296_688_602;

/// Parameters defining a blockchain network
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Human-readable network name, used in logs
    pub network_name: String,
    /// The first block of the chain
    pub genesis: Block,
    /// No target may ever be easier than this ceiling
    pub pow_limit: BigUint,
    /// Difficulty is retargeted every this many blocks
    pub interval: u64,
    /// The timespan one interval of blocks should ideally take, seconds
    pub target_timespan_secs: u64,
}

impl ChainParams {
    /// Parameters for the main network: retarget every 2016 blocks
    /// against a two-week ideal timespan.
    pub fn new() -> Self {
        Self::build("main", MAIN_POW_LIMIT_BITS, 2016, 14 * 24 * 60 * 60)
    }

    /// Parameters for unit testing: a trivial proof-of-work ceiling and
    /// a short retarget interval so difficulty transitions are reachable
    /// within a test.
    pub fn unit_test() -> Self {
        Self::build("unittest", TEST_POW_LIMIT_BITS, 10, 6000)
    }

    fn build(name: &str, limit_bits: u32, interval: u64, target_timespan_secs: u64) -> Self {
        let pow_limit = decode_compact(limit_bits).expect("pow limit bits are well formed");

        let coinbase = Transaction::coinbase(&format!("{name}-genesis"), BLOCK_REWARD, 0);
        let mut genesis = Block::new("0".repeat(64), vec![coinbase], GENESIS_TIME, limit_bits);
        genesis.solve();

        Self {
            network_name: name.to_string(),
            genesis,
            pow_limit,
            interval,
            target_timespan_secs,
        }
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::new()
    }
}
