//! Chain selection engine
//!
//! Accepts candidate blocks, verifies them, tracks every fork it has
//! seen, and keeps the head pointed at the chain with the most
//! cumulative work. When a fork overtakes the current best chain the
//! engine walks both branches back to their split point and asks the
//! wallet to reorganize around it.
//!
//! One exclusive section covers verification, storage, and wallet
//! delivery: the store lock is taken first, then the wallet lock, and
//! both are held until the block is fully processed. No observer ever
//! sees a block stored but not delivered.

use crate::chain::store::{BlockStore, StoreError, StoredBlock};
use crate::core::difficulty::{decode_compact, encode_compact, hash_to_int};
use crate::core::{Block, Transaction};
use crate::params::ChainParams;
use crate::wallet::{BlockKind, Wallet};
use log::{debug, info};
use num_bigint::BigUint;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Why a block failed verification
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Difficulty target is bad: {0:#010x}")]
    BadDifficultyTarget(u32),
    #[error("Hash {hash} does not meet the target encoded by {bits:#010x}")]
    ProofOfWork { hash: String, bits: u32 },
    #[error("Unexpected change in difficulty at height {height}: {expected:#010x} vs {got:#010x}")]
    UnexpectedDifficultyChange { height: u64, expected: u32, got: u32 },
    #[error("Wrong difficulty target at transition height {height}: expected {expected:#010x}, got {got:#010x}")]
    WrongDifficultyTarget { height: u64, expected: u32, got: u32 },
    #[error("Merkle root does not match the block's transactions")]
    BadMerkleRoot,
}

/// Chain engine errors
#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Orphan block {0}: previous block not found")]
    Orphan(String),
}

/// What happened to a block the engine accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDisposition {
    /// The block was already known; nothing changed
    Duplicate,
    /// The block extended the best chain and is the new head
    Extended,
    /// The block was stored on a side chain; the head did not move
    SideChain,
    /// The block made a side chain the new best chain
    Reorganized,
}

impl BlockDisposition {
    /// Whether the block ended up on the best chain
    pub fn is_best_chain(&self) -> bool {
        matches!(self, Self::Extended | Self::Reorganized)
    }
}

/// The chain selection engine
pub struct ChainEngine {
    params: ChainParams,
    store: Mutex<Box<dyn BlockStore>>,
    wallet: Arc<Mutex<Wallet>>,
}

impl ChainEngine {
    /// Create an engine over a seeded store and the wallet it keeps
    /// reconciled with the best chain.
    pub fn new(params: ChainParams, store: Box<dyn BlockStore>, wallet: Arc<Mutex<Wallet>>) -> Self {
        Self {
            params,
            store: Mutex::new(store),
            wallet,
        }
    }

    /// The current head of the best chain
    pub fn chain_head(&self) -> Result<StoredBlock, ChainError> {
        Ok(self.store.lock().chain_head()?)
    }

    /// Process a candidate block. Returns where it landed, or an error
    /// describing why it was rejected. Rejected blocks leave no trace;
    /// in particular an [`ChainError::Orphan`] block should be re-sent
    /// once its ancestors are known.
    pub fn add(&self, block: &Block) -> Result<BlockDisposition, ChainError> {
        let mut store = self.store.lock();
        let mut wallet = self.wallet.lock();
        self.add_locked(store.as_mut(), &mut wallet, block)
    }

    fn add_locked(
        &self,
        store: &mut dyn BlockStore,
        wallet: &mut Wallet,
        block: &Block,
    ) -> Result<BlockDisposition, ChainError> {
        let hash = block.hash();
        if store.contains(&hash)? {
            return Ok(BlockDisposition::Duplicate);
        }

        // Cheap checks first: the target must be well formed, no easier
        // than the network ceiling, and actually met by the hash.
        let bits = block.header.bits;
        let target = decode_compact(bits)
            .filter(|t| *t <= self.params.pow_limit)
            .ok_or(VerificationError::BadDifficultyTarget(bits))?;
        let hash_value = hash_to_int(&hash).ok_or_else(|| {
            StoreError::Inconsistent(format!("block hash {hash} is not hex"))
        })?;
        if hash_value > target {
            return Err(VerificationError::ProofOfWork { hash, bits }.into());
        }

        // Contextual checks need the parent.
        let prev = store
            .get(&block.header.previous_hash)?
            .ok_or_else(|| ChainError::Orphan(hash.clone()))?;
        self.check_difficulty_transition(store, &prev, bits)?;

        // The merkle root is only verified when the block carries at
        // least one transaction this wallet cares about; irrelevant
        // blocks are tracked by header alone.
        let relevant: Vec<&Transaction> = block
            .transactions
            .iter()
            .filter(|tx| wallet.is_relevant(tx))
            .collect();
        if !relevant.is_empty() && !block.verify_merkle_root() {
            return Err(VerificationError::BadMerkleRoot.into());
        }

        let stored = StoredBlock::build(block.header.clone(), &prev)
            .ok_or(VerificationError::BadDifficultyTarget(bits))?;
        let head = store.chain_head()?;

        if prev.hash() == head.hash() {
            store.put(&stored)?;
            store.set_chain_head(&stored)?;
            for tx in &relevant {
                wallet.receive(tx, &hash, BlockKind::BestChain);
            }
            debug!("block {hash} extends the best chain to height {}", stored.height);
            return Ok(BlockDisposition::Extended);
        }

        // Side chain. Store it, let the wallet note the sighting, then
        // see whether this fork now carries strictly more work. Ties go
        // to the chain we saw first.
        store.put(&stored)?;
        for tx in &relevant {
            wallet.receive(tx, &hash, BlockKind::SideChain);
        }
        if stored.chain_work <= head.chain_work {
            debug!(
                "block {hash} on a side chain at height {} (head height {})",
                stored.height, head.height
            );
            return Ok(BlockDisposition::SideChain);
        }

        let split = find_split(store, &stored, &head)?;
        let disconnected = path_back(store, &head, &split.hash())?;
        let mut connected = path_back(store, &stored, &split.hash())?;
        connected.reverse();
        info!(
            "reorganize: split at height {}, disconnecting {} blocks, connecting {}",
            split.height,
            disconnected.len(),
            connected.len()
        );

        let disconnected_hashes: Vec<String> = disconnected.iter().map(|b| b.hash()).collect();
        let connected_hashes: Vec<String> = connected.iter().map(|b| b.hash()).collect();
        store.set_chain_head(&stored)?;
        wallet.reorganize(&split.hash(), &disconnected_hashes, &connected_hashes);
        Ok(BlockDisposition::Reorganized)
    }

    /// Difficulty rules. Off a transition boundary the target must not
    /// change; on one it must equal the retarget computed from how long
    /// the previous interval actually took.
    fn check_difficulty_transition(
        &self,
        store: &dyn BlockStore,
        prev: &StoredBlock,
        bits: u32,
    ) -> Result<(), ChainError> {
        let height = prev.height + 1;
        if height % self.params.interval != 0 {
            if bits != prev.header.bits {
                return Err(VerificationError::UnexpectedDifficultyChange {
                    height,
                    expected: prev.header.bits,
                    got: bits,
                }
                .into());
            }
            return Ok(());
        }

        let mut cursor = prev.clone();
        for _ in 0..self.params.interval - 1 {
            cursor = step_back(store, &cursor)?;
        }

        let target_timespan = self.params.target_timespan_secs;
        let actual = prev.header.time.saturating_sub(cursor.header.time);
        let actual = actual.clamp(target_timespan / 4, target_timespan * 4);

        let prev_target = decode_compact(prev.header.bits).ok_or_else(|| {
            StoreError::Inconsistent(format!(
                "stored block {} has malformed difficulty bits",
                prev.hash()
            ))
        })?;
        let mut new_target = prev_target * BigUint::from(actual) / BigUint::from(target_timespan);
        if new_target > self.params.pow_limit {
            new_target = self.params.pow_limit.clone();
        }

        let expected = encode_compact(&new_target);
        if bits != expected {
            return Err(VerificationError::WrongDifficultyTarget {
                height,
                expected,
                got: bits,
            }
            .into());
        }
        Ok(())
    }

    /// A block locator for the best chain: the head first, then hashes
    /// at exponentially growing distances, ending with genesis. A peer
    /// scans it front to back for the first hash it recognises, giving
    /// a recent common block in logarithmically many entries.
    pub fn block_locator(&self) -> Result<Vec<String>, ChainError> {
        let store = self.store.lock();
        let genesis_hash = self.params.genesis.hash();
        let mut cursor = store.chain_head()?;
        let mut locator = Vec::new();
        let mut step = 1u64;
        loop {
            locator.push(cursor.hash());
            if cursor.hash() == genesis_hash {
                return Ok(locator);
            }
            for _ in 0..step.min(cursor.height) {
                cursor = step_back(store.as_ref(), &cursor)?;
            }
            step *= 2;
        }
    }
}

fn step_back(store: &dyn BlockStore, block: &StoredBlock) -> Result<StoredBlock, ChainError> {
    store.get(&block.header.previous_hash)?.ok_or_else(|| {
        StoreError::Inconsistent(format!(
            "missing ancestor {} of stored block {}",
            block.header.previous_hash,
            block.hash()
        ))
        .into()
    })
}

/// Walk both chain tips back to their last common block.
fn find_split(
    store: &dyn BlockStore,
    new_head: &StoredBlock,
    old_head: &StoredBlock,
) -> Result<StoredBlock, ChainError> {
    let mut a = new_head.clone();
    let mut b = old_head.clone();
    while a.height > b.height {
        a = step_back(store, &a)?;
    }
    while b.height > a.height {
        b = step_back(store, &b)?;
    }
    while a.hash() != b.hash() {
        a = step_back(store, &a)?;
        b = step_back(store, &b)?;
    }
    Ok(a)
}

/// Blocks from `from` (inclusive) back to `stop_hash` (exclusive),
/// newest first.
fn path_back(
    store: &dyn BlockStore,
    from: &StoredBlock,
    stop_hash: &str,
) -> Result<Vec<StoredBlock>, ChainError> {
    let mut path = Vec::new();
    let mut cursor = from.clone();
    while cursor.hash() != stop_hash {
        path.push(cursor.clone());
        cursor = step_back(store, &cursor)?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::store::MemoryBlockStore;
    use crate::crypto::KeyPair;
    use crate::wallet::{BalanceType, Pool};
    use std::sync::atomic::{AtomicBool, Ordering};

    const EASY_BITS: u32 = 0x207f_ffff;

    fn setup() -> (ChainEngine, Arc<Mutex<Wallet>>, ChainParams, String) {
        let params = ChainParams::unit_test();
        let mut wallet = Wallet::new();
        let key = KeyPair::generate();
        let address = key.address();
        wallet.add_key(key);
        let wallet = Arc::new(Mutex::new(wallet));
        let store = Box::new(MemoryBlockStore::new(&params));
        let engine = ChainEngine::new(params.clone(), store, Arc::clone(&wallet));
        (engine, wallet, params, address)
    }

    fn available(wallet: &Arc<Mutex<Wallet>>) -> u64 {
        wallet.lock().balance(BalanceType::Available)
    }

    #[test]
    fn test_extends_best_chain() {
        let (engine, wallet, params, address) = setup();
        let t = params.genesis.header.time;

        let b1 = params.genesis.create_next(&address, t + 2);
        assert_eq!(engine.add(&b1).unwrap(), BlockDisposition::Extended);
        assert!(BlockDisposition::Extended.is_best_chain());
        assert_eq!(engine.chain_head().unwrap().hash(), b1.hash());
        assert_eq!(available(&wallet), 50);

        let b2 = b1.create_next(&address, t + 4);
        assert_eq!(engine.add(&b2).unwrap(), BlockDisposition::Extended);
        assert_eq!(engine.chain_head().unwrap().height, 2);
        assert_eq!(available(&wallet), 100);
    }

    #[test]
    fn test_orphan_is_rejected_until_parent_arrives() {
        let (engine, _, params, address) = setup();
        let t = params.genesis.header.time;

        let b1 = params.genesis.create_next(&address, t + 2);
        let b2 = b1.create_next(&address, t + 4);

        assert!(matches!(engine.add(&b2), Err(ChainError::Orphan(_))));
        // Nothing was stored; the head has not moved.
        assert_eq!(engine.chain_head().unwrap().height, 0);

        assert_eq!(engine.add(&b1).unwrap(), BlockDisposition::Extended);
        assert_eq!(engine.add(&b2).unwrap(), BlockDisposition::Extended);
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let (engine, wallet, params, address) = setup();
        let b1 = params
            .genesis
            .create_next(&address, params.genesis.header.time + 2);

        assert_eq!(engine.add(&b1).unwrap(), BlockDisposition::Extended);
        assert_eq!(engine.add(&b1).unwrap(), BlockDisposition::Duplicate);
        assert_eq!(engine.chain_head().unwrap().hash(), b1.hash());
        assert_eq!(available(&wallet), 50);
    }

    #[test]
    fn test_merkle_root_ignored_for_irrelevant_blocks() {
        let (engine, _, params, _) = setup();
        let mut b1 = params
            .genesis
            .create_next("somebody-else", params.genesis.header.time + 2);
        b1.set_merkle_root("f".repeat(64));
        b1.solve();
        assert_eq!(engine.add(&b1).unwrap(), BlockDisposition::Extended);
    }

    #[test]
    fn test_merkle_root_checked_for_relevant_blocks() {
        let (engine, _, params, address) = setup();
        let mut b1 = params
            .genesis
            .create_next(&address, params.genesis.header.time + 2);
        b1.set_merkle_root("f".repeat(64));
        b1.solve();
        assert!(matches!(
            engine.add(&b1),
            Err(ChainError::Verification(VerificationError::BadMerkleRoot))
        ));
    }

    #[test]
    fn test_difficulty_transition() {
        let (engine, _, params, _) = setup();
        let t = params.genesis.header.time;

        // Blocks arriving 2 seconds apart, far faster than the 6000
        // second ideal timespan, so the retarget clamps at a quarter of
        // the ideal and the target divides by four.
        let mut prev = params.genesis.clone();
        for height in 1..params.interval {
            let b = prev.create_next("miner", t + 2 * height);
            assert_eq!(engine.add(&b).unwrap(), BlockDisposition::Extended);
            prev = b;
        }

        // Keeping the old target at the boundary is rejected.
        let stale = prev.create_next("miner", t + 2 * params.interval);
        assert!(matches!(
            engine.add(&stale),
            Err(ChainError::Verification(
                VerificationError::WrongDifficultyTarget { expected: 0x201f_ffff, .. }
            ))
        ));

        let mut b10 = prev.create_next("miner", t + 2 * params.interval);
        b10.header.bits = 0x201f_ffff;
        b10.solve();
        assert_eq!(engine.add(&b10).unwrap(), BlockDisposition::Extended);
    }

    #[test]
    fn test_difficulty_change_off_boundary_rejected() {
        let (engine, _, params, _) = setup();
        let mut b1 = params
            .genesis
            .create_next("miner", params.genesis.header.time + 2);
        b1.header.bits = 0x1f7f_ffff;
        b1.solve();
        assert!(matches!(
            engine.add(&b1),
            Err(ChainError::Verification(
                VerificationError::UnexpectedDifficultyChange { expected: EASY_BITS, .. }
            ))
        ));
    }

    #[test]
    fn test_difficulty_easier_than_ceiling_rejected() {
        let (engine, _, params, _) = setup();
        let mut b1 = params
            .genesis
            .create_next("miner", params.genesis.header.time + 2);
        b1.header.bits = 0x2100_ffff;
        assert!(matches!(
            engine.add(&b1),
            Err(ChainError::Verification(
                VerificationError::BadDifficultyTarget(0x2100_ffff)
            ))
        ));
    }

    #[test]
    fn test_malformed_difficulty_rejected() {
        let (engine, _, params, _) = setup();
        let mut b1 = params
            .genesis
            .create_next("miner", params.genesis.header.time + 2);
        b1.header.bits = 0x2080_0001;
        assert!(matches!(
            engine.add(&b1),
            Err(ChainError::Verification(
                VerificationError::BadDifficultyTarget(0x2080_0001)
            ))
        ));
    }

    #[test]
    fn test_fork_and_reorganize() {
        let (engine, wallet, params, address) = setup();
        let t = params.genesis.header.time;

        // Our coinbase on what starts as the best chain.
        let b1 = params.genesis.create_next(&address, t + 2);
        assert_eq!(engine.add(&b1).unwrap(), BlockDisposition::Extended);
        assert_eq!(available(&wallet), 50);

        // A competing fork from genesis. Same work: first seen wins.
        let b2 = params.genesis.create_next("other-miner", t + 3);
        assert_eq!(engine.add(&b2).unwrap(), BlockDisposition::SideChain);
        assert_eq!(engine.chain_head().unwrap().hash(), b1.hash());
        assert_eq!(available(&wallet), 50);

        // The fork pulls ahead; our coinbase drops off the best chain.
        let b3 = b2.create_next("other-miner", t + 5);
        assert_eq!(engine.add(&b3).unwrap(), BlockDisposition::Reorganized);
        assert_eq!(engine.chain_head().unwrap().hash(), b3.hash());
        assert_eq!(available(&wallet), 0);
    }

    #[test]
    fn test_reorganize_back_restores_coins() {
        let (engine, wallet, params, address) = setup();
        let t = params.genesis.header.time;

        let b1 = params.genesis.create_next(&address, t + 2);
        let b2 = params.genesis.create_next("other-miner", t + 3);
        let b3 = b2.create_next("other-miner", t + 5);
        engine.add(&b1).unwrap();
        engine.add(&b2).unwrap();
        engine.add(&b3).unwrap();
        assert_eq!(available(&wallet), 0);

        // Our original branch grows back past the other fork.
        let b4 = b1.create_next(&address, t + 7);
        assert_eq!(engine.add(&b4).unwrap(), BlockDisposition::SideChain);
        assert_eq!(available(&wallet), 0);

        let b5 = b4.create_next(&address, t + 9);
        assert_eq!(engine.add(&b5).unwrap(), BlockDisposition::Reorganized);
        assert_eq!(engine.chain_head().unwrap().hash(), b5.hash());
        assert_eq!(available(&wallet), 150);
    }

    #[test]
    fn test_fork_from_mid_chain() {
        let (engine, wallet, params, address) = setup();
        let t = params.genesis.header.time;

        let b1 = params.genesis.create_next(&address, t + 2);
        let b2 = b1.create_next(&address, t + 4);
        engine.add(&b1).unwrap();
        engine.add(&b2).unwrap();
        assert_eq!(available(&wallet), 100);

        // A heavier branch splitting off after b1 orphans only b2.
        let b3 = b1.create_next("other-miner", t + 5);
        let b4 = b3.create_next("other-miner", t + 7);
        assert_eq!(engine.add(&b3).unwrap(), BlockDisposition::SideChain);
        assert_eq!(engine.add(&b4).unwrap(), BlockDisposition::Reorganized);
        assert_eq!(available(&wallet), 50);

        // Growing the original branch past the fork wins it all back.
        let b5 = b2.create_next(&address, t + 9);
        let b6 = b5.create_next(&address, t + 11);
        assert_eq!(engine.add(&b5).unwrap(), BlockDisposition::SideChain);
        assert_eq!(engine.add(&b6).unwrap(), BlockDisposition::Reorganized);
        assert_eq!(available(&wallet), 200);
    }

    #[test]
    fn test_double_spend_in_block_kills_pending() {
        let (engine, wallet, params, address) = setup();
        let t = params.genesis.header.time;

        let b1 = params.genesis.create_next(&address, t + 2);
        engine.add(&b1).unwrap();
        assert_eq!(available(&wallet), 50);

        // Two competing spends of the same coin: one committed to the
        // wallet, the other showing up in a mined block.
        let (t1, t2) = {
            let mut w = wallet.lock();
            let t2 = w.create_send("attacker", 50).unwrap();
            let t1 = w.create_send("merchant", 50).unwrap();
            w.confirm_send(&t1).unwrap();
            (t1, t2)
        };
        assert_eq!(wallet.lock().pool_size(Pool::Pending), 1);

        let mut b2 = b1.create_next("other-miner", t + 4);
        b2.add_transaction(t2.clone());
        b2.solve();
        assert_eq!(engine.add(&b2).unwrap(), BlockDisposition::Extended);

        let w = wallet.lock();
        assert_eq!(w.pool_size(Pool::Pending), 0);
        assert_eq!(w.pool_size(Pool::Dead), 1);
        assert_eq!(w.pool_of(&t1.id), Some(Pool::Dead));
        drop(w);
        assert_eq!(available(&wallet), 0);
    }

    #[test]
    fn test_double_spend_on_fork_kills_confirmed() {
        let (engine, wallet, params, address) = setup();
        let t = params.genesis.header.time;

        let b1 = params.genesis.create_next(&address, t + 2);
        engine.add(&b1).unwrap();
        assert_eq!(available(&wallet), 50);

        // Two spends of the same coin. Only the first is committed and
        // mined on the best chain; the other waits on a fork.
        let (t1, t2) = {
            let mut w = wallet.lock();
            let t1 = w.create_send("merchant", 10).unwrap();
            let t2 = w.create_send("stranger", 20).unwrap();
            w.confirm_send(&t1).unwrap();
            (t1, t2)
        };

        let mut b2 = b1.create_next("miner", t + 4);
        b2.add_transaction(t1.clone());
        b2.solve();
        assert_eq!(engine.add(&b2).unwrap(), BlockDisposition::Extended);
        assert_eq!(available(&wallet), 40);
        assert_eq!(wallet.lock().pool_of(&t1.id), Some(Pool::Unspent));

        let deaths: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&deaths);
        wallet.lock().on_transaction_dead(move |dead, replacement| {
            sink.lock().push((dead.id.clone(), replacement.id.clone()));
        });

        // The fork carries the conflicting spend and pulls ahead. The
        // confirmed spend dies; the fork's wins, change and all.
        let mut b3 = b1.create_next("other-miner", t + 5);
        b3.add_transaction(t2.clone());
        b3.solve();
        assert_eq!(engine.add(&b3).unwrap(), BlockDisposition::SideChain);
        assert_eq!(available(&wallet), 40);

        let b4 = b3.create_next("other-miner", t + 7);
        assert_eq!(engine.add(&b4).unwrap(), BlockDisposition::Reorganized);

        let w = wallet.lock();
        assert_eq!(w.pool_of(&t1.id), Some(Pool::Dead));
        assert_eq!(w.pool_of(&t2.id), Some(Pool::Unspent));
        drop(w);
        assert_eq!(*deaths.lock(), vec![(t1.id.clone(), t2.id.clone())]);
        assert_eq!(available(&wallet), 30);
    }

    #[test]
    fn test_external_spend_on_fork_marks_coins_spent() {
        let (engine, wallet, params, address) = setup();
        let t = params.genesis.header.time;

        let b1 = params.genesis.create_next(&address, t + 2);
        engine.add(&b1).unwrap();
        let b2 = b1.create_next("miner", t + 4);
        engine.add(&b2).unwrap();
        assert_eq!(available(&wallet), 50);

        // A spend of our coin we never committed surfaces on a fork
        // that then wins: the wallet learns of it only through the
        // reorganization replay.
        let theft = wallet.lock().create_send("stranger", 50).unwrap();
        let mut b3 = b1.create_next("other-miner", t + 5);
        b3.add_transaction(theft.clone());
        b3.solve();
        assert_eq!(engine.add(&b3).unwrap(), BlockDisposition::SideChain);
        assert_eq!(wallet.lock().pool_of(&theft.id), Some(Pool::Inactive));
        assert_eq!(available(&wallet), 50);

        let b4 = b3.create_next("other-miner", t + 7);
        assert_eq!(engine.add(&b4).unwrap(), BlockDisposition::Reorganized);

        assert_eq!(wallet.lock().pool_of(&theft.id), Some(Pool::Spent));
        assert_eq!(available(&wallet), 0);
    }

    #[test]
    fn test_confirmed_spend_updates_balance() {
        let (engine, wallet, params, address) = setup();
        let t = params.genesis.header.time;

        let b1 = params.genesis.create_next(&address, t + 2);
        engine.add(&b1).unwrap();

        let t1 = {
            let mut w = wallet.lock();
            let t1 = w.create_send("merchant", 20).unwrap();
            w.confirm_send(&t1).unwrap();
            t1
        };
        assert_eq!(available(&wallet), 0);

        let mut b2 = b1.create_next("other-miner", t + 4);
        b2.add_transaction(t1);
        b2.solve();
        assert_eq!(engine.add(&b2).unwrap(), BlockDisposition::Extended);
        // The change output is confirmed now.
        assert_eq!(available(&wallet), 30);
    }

    #[test]
    fn test_block_locator_shape() {
        let (engine, _, params, _) = setup();
        let t = params.genesis.header.time;

        let mut prev = params.genesis.clone();
        for height in 1..=6 {
            let b = prev.create_next("miner", t + 2 * height);
            engine.add(&b).unwrap();
            prev = b;
        }

        let locator = engine.block_locator().unwrap();
        assert_eq!(locator.first().unwrap(), &prev.hash());
        assert_eq!(locator.last().unwrap(), &params.genesis.hash());
        let mut dedup = locator.clone();
        dedup.dedup();
        assert_eq!(dedup, locator);
        // Far fewer entries than blocks once the stride starts doubling.
        assert!(locator.len() <= 5);
    }

    #[test]
    fn test_locator_for_fresh_chain_is_genesis() {
        let (engine, _, params, _) = setup();
        assert_eq!(engine.block_locator().unwrap(), vec![params.genesis.hash()]);
    }

    struct BrokenHeadStore {
        inner: MemoryBlockStore,
        fail_set_head: Arc<AtomicBool>,
    }

    impl BlockStore for BrokenHeadStore {
        fn put(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
            self.inner.put(block)
        }

        fn get(&self, hash: &str) -> Result<Option<StoredBlock>, StoreError> {
            self.inner.get(hash)
        }

        fn chain_head(&self) -> Result<StoredBlock, StoreError> {
            self.inner.chain_head()
        }

        fn set_chain_head(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
            if self.fail_set_head.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("head pointer write failed".to_string()));
            }
            self.inner.set_chain_head(block)
        }
    }

    #[test]
    fn test_head_failure_leaves_wallet_untouched() {
        let params = ChainParams::unit_test();
        let mut wallet = Wallet::new();
        let key = KeyPair::generate();
        let address = key.address();
        wallet.add_key(key);
        let wallet = Arc::new(Mutex::new(wallet));

        let fail = Arc::new(AtomicBool::new(true));
        let store = Box::new(BrokenHeadStore {
            inner: MemoryBlockStore::new(&params),
            fail_set_head: Arc::clone(&fail),
        });
        let engine = ChainEngine::new(params.clone(), store, Arc::clone(&wallet));

        let b1 = params
            .genesis
            .create_next(&address, params.genesis.header.time + 2);
        assert!(matches!(
            engine.add(&b1),
            Err(ChainError::Store(StoreError::Backend(_)))
        ));

        // The head never moved, so the wallet heard nothing.
        assert_eq!(engine.chain_head().unwrap().height, 0);
        assert_eq!(wallet.lock().tx_count(), 0);
        assert_eq!(available(&wallet), 0);
    }
}
