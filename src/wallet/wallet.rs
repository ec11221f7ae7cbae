//! Wallet: keys plus a reconciled view of relevant transactions
//!
//! Every transaction the wallet has ever cared about sits in exactly
//! one of five pools:
//!
//! - `Pending`: committed locally, not yet seen in the best chain
//! - `Unspent`: in the best chain with at least one of our outputs free
//! - `Spent`: in the best chain with all of our outputs claimed
//! - `Inactive`: only seen on side chains
//! - `Dead`: overridden by a double spend
//!
//! A claims table maps each consumed output to the transaction
//! currently claiming it; double spends are detected the moment a
//! second claimant shows up. The chain engine drives this type: it
//! delivers relevant transactions as blocks arrive and asks the wallet
//! to reorganize when the best chain changes.

use crate::core::{OutPoint, Transaction, TransactionError, TransactionInput, TransactionOutput};
use crate::crypto::{KeyError, KeyPair};
use crate::wallet::events::{
    CoinsReceivedHandler, ReorganizedHandler, TransactionDeadHandler, WalletListeners,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Wallet-related errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("Wallet contract violation: {0}")]
    ContractViolation(String),
    #[error("Crypto error: {0}")]
    Key(#[from] KeyError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which pool a wallet transaction currently sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pool {
    Pending,
    Unspent,
    Spent,
    Inactive,
    Dead,
}

/// How a delivered transaction relates to the best chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    BestChain,
    SideChain,
}

/// Which notion of balance to compute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceType {
    /// Confirmed and spendable right now
    Available,
    /// Available plus pending change and receipts
    Estimated,
}

/// A transaction together with the wallet's bookkeeping for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTx {
    pub tx: Transaction,
    pub pool: Pool,
    /// Hashes of every block this transaction has been seen in, on any
    /// chain. Used to replay the right transactions during a reorg.
    pub appears_in: HashSet<String>,
    /// The double spend that killed this transaction, if dead
    pub killed_by: Option<String>,
}

/// Serializable wallet snapshot for persistence
#[derive(Serialize, Deserialize)]
struct WalletData {
    private_keys: Vec<String>,
    /// Transactions in insertion order; coin selection depends on it
    transactions: Vec<WalletTx>,
    claims: Vec<(OutPoint, String)>,
}

/// A wallet holding keys and the transactions relevant to them
pub struct Wallet {
    keys: Vec<KeyPair>,
    addresses: Vec<String>,
    txs: HashMap<String, WalletTx>,
    /// Transaction IDs in the order they were first seen
    order: Vec<String>,
    /// Consumed output -> the transaction currently claiming it.
    /// Inactive and dead transactions hold no claims, with one
    /// exception: a confirmed spend demoted by a reorg keeps its claims
    /// so the coins it consumed do not appear spendable.
    claims: HashMap<OutPoint, String>,
    listeners: WalletListeners,
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

impl Wallet {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            addresses: Vec::new(),
            txs: HashMap::new(),
            order: Vec::new(),
            claims: HashMap::new(),
            listeners: WalletListeners::default(),
        }
    }

    /// Add a signing key. Outputs paying its address become ours.
    pub fn add_key(&mut self, key: KeyPair) {
        self.addresses.push(key.address());
        self.keys.push(key);
    }

    /// Addresses of all keys in this wallet
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// The keys in this wallet, in insertion order
    pub fn keychain(&self) -> &[KeyPair] {
        &self.keys
    }

    /// Whether an output pays one of our addresses
    pub fn is_mine_output(&self, output: &TransactionOutput) -> bool {
        self.addresses.iter().any(|a| output.is_owned_by(a))
    }

    /// Whether a transaction is worth tracking: it pays us, spends from
    /// us, or double-spends an output something we track has claimed.
    pub fn is_relevant(&self, tx: &Transaction) -> bool {
        if tx.outputs.iter().any(|o| self.is_mine_output(o)) {
            return true;
        }
        if tx.is_coinbase {
            return false;
        }
        tx.inputs.iter().any(|input| {
            self.claims.contains_key(&input.outpoint())
                || self
                    .consumed_output(input)
                    .is_some_and(|o| self.is_mine_output(o))
        })
    }

    /// Total value of this transaction's outputs paying us
    pub fn value_sent_to_me(&self, tx: &Transaction) -> u64 {
        tx.outputs
            .iter()
            .filter(|o| self.is_mine_output(o))
            .map(|o| o.amount)
            .sum()
    }

    /// Total value this transaction takes out of our outputs
    pub fn value_sent_from_me(&self, tx: &Transaction) -> u64 {
        if tx.is_coinbase {
            return 0;
        }
        tx.inputs
            .iter()
            .filter_map(|i| self.consumed_output(i))
            .filter(|o| self.is_mine_output(o))
            .map(|o| o.amount)
            .sum()
    }

    /// The output an input consumes, when we track the transaction it
    /// refers to.
    fn consumed_output(&self, input: &TransactionInput) -> Option<&TransactionOutput> {
        self.txs
            .get(&input.tx_id)
            .and_then(|w| w.tx.outputs.get(input.output_index as usize))
    }

    /// Bookkeeping for a transaction delivered from a block
    pub fn receive(&mut self, tx: &Transaction, block_hash: &str, kind: BlockKind) {
        match kind {
            BlockKind::BestChain => self.receive_best_chain(tx, block_hash),
            BlockKind::SideChain => self.receive_side_chain(tx, block_hash),
        }
    }

    fn receive_best_chain(&mut self, tx: &Transaction, block_hash: &str) {
        let id = tx.id.clone();
        let was_confirmed = matches!(self.pool_of(&id), Some(Pool::Unspent | Pool::Spent));
        let balance_before = self.balance(BalanceType::Available);
        debug!("wallet sees {id} in best-chain block {block_hash}");

        if let Some(wtx) = self.txs.get_mut(&id) {
            wtx.appears_in.insert(block_hash.to_string());
        } else {
            self.insert_tx(WalletTx {
                tx: tx.clone(),
                pool: Pool::Pending,
                appears_in: HashSet::from([block_hash.to_string()]),
                killed_by: None,
            });
        }

        // Take over the consumed outputs; a conflicting claimant is a
        // double spend the chain has now resolved against.
        let dead = self.apply_input_claims(&id);
        self.classify(&id);
        if !tx.is_coinbase {
            for input in &tx.inputs {
                self.reclassify_owner(&input.tx_id);
            }
        }

        if !was_confirmed && self.value_sent_to_me(tx) > self.value_sent_from_me(tx) {
            let balance_after = self.balance(BalanceType::Available);
            self.fire_coins_received(tx, balance_before, balance_after);
        }
        for (dead_tx, killer_id) in dead {
            if let Some(replacement) = self.txs.get(&killer_id).map(|w| w.tx.clone()) {
                self.fire_transaction_dead(&dead_tx, &replacement);
            }
        }
    }

    fn receive_side_chain(&mut self, tx: &Transaction, block_hash: &str) {
        if let Some(wtx) = self.txs.get_mut(&tx.id) {
            // Already tracked; just remember the extra sighting.
            wtx.appears_in.insert(block_hash.to_string());
            return;
        }
        debug!("wallet sees {} in side-chain block {block_hash}", tx.id);

        // A side-chain double spend of something already confirmed is
        // born dead; it only matters if its chain later wins.
        let mut pool = Pool::Inactive;
        let mut killed_by = None;
        if !tx.is_coinbase {
            for input in &tx.inputs {
                if let Some(claimant) = self.claims.get(&input.outpoint()) {
                    if claimant != &tx.id
                        && matches!(self.pool_of(claimant), Some(Pool::Unspent | Pool::Spent))
                    {
                        pool = Pool::Dead;
                        killed_by = Some(claimant.clone());
                    }
                }
            }
        }
        self.insert_tx(WalletTx {
            tx: tx.clone(),
            pool,
            appears_in: HashSet::from([block_hash.to_string()]),
            killed_by,
        });
    }

    /// Commit a locally created spend. The transaction enters the
    /// pending pool and claims its inputs immediately, so a later
    /// attempt to spend the same coins fails fast.
    pub fn confirm_send(&mut self, tx: &Transaction) -> Result<(), WalletError> {
        if self.txs.contains_key(&tx.id) {
            return Err(WalletError::ContractViolation(format!(
                "transaction {} is already tracked",
                tx.id
            )));
        }
        for input in &tx.inputs {
            let outpoint = input.outpoint();
            if let Some(claimant) = self.claims.get(&outpoint) {
                return Err(WalletError::ContractViolation(format!(
                    "output {}:{} is already claimed by {claimant}",
                    outpoint.tx_id, outpoint.index
                )));
            }
        }

        self.insert_tx(WalletTx {
            tx: tx.clone(),
            pool: Pool::Pending,
            appears_in: HashSet::new(),
            killed_by: None,
        });
        for input in &tx.inputs {
            self.claims.insert(input.outpoint(), tx.id.clone());
            self.reclassify_owner(&input.tx_id);
        }
        Ok(())
    }

    /// Reconcile with a change of best chain. `split_hash` names the
    /// last block common to both chains, `disconnected` holds the block
    /// hashes that fell off the best chain, `connected` the new
    /// best-chain blocks after the split point, oldest first.
    pub fn reorganize(&mut self, split_hash: &str, disconnected: &[String], connected: &[String]) {
        assert!(
            !connected.is_empty(),
            "a reorganization must connect at least one block"
        );
        assert!(
            !disconnected.iter().chain(connected).any(|h| h == split_hash),
            "the split block {split_hash} sits on both chains and belongs in neither path"
        );
        info!(
            "wallet reorganize at split {split_hash}: {} blocks disconnected, {} connected",
            disconnected.len(),
            connected.len()
        );
        let gone: HashSet<&String> = disconnected.iter().collect();
        let ids = self.order.clone();

        // Confirmed transactions that only ever appeared in the
        // disconnected blocks drop to inactive. Their claims stay: the
        // spend may well confirm again, and until then the coins it
        // consumed must not look spendable.
        for id in &ids {
            if let Some(wtx) = self.txs.get_mut(id) {
                if matches!(wtx.pool, Pool::Unspent | Pool::Spent)
                    && !wtx.appears_in.is_empty()
                    && wtx.appears_in.iter().all(|h| gone.contains(h))
                {
                    wtx.pool = Pool::Inactive;
                }
            }
        }

        // Replay the new best chain oldest-first; transactions we saw
        // in those blocks get promoted exactly as if the blocks had
        // arrived on the best chain to begin with.
        for hash in connected {
            let replay: Vec<Transaction> = ids
                .iter()
                .filter_map(|id| self.txs.get(id))
                .filter(|w| w.appears_in.contains(hash))
                .map(|w| w.tx.clone())
                .collect();
            for tx in replay {
                self.receive_best_chain(&tx, hash);
            }
        }

        // A dead transaction whose killer fell off the best chain is a
        // live double spend again: back to pending, claims and all.
        for id in &ids {
            let resurrect = match self.txs.get(id) {
                Some(w) if w.pool == Pool::Dead => match &w.killed_by {
                    Some(killer) => !matches!(
                        self.pool_of(killer),
                        Some(Pool::Pending | Pool::Unspent | Pool::Spent)
                    ),
                    None => false,
                },
                _ => false,
            };
            if resurrect {
                info!("resurrecting {id}: its killer is no longer on the best chain");
                let outpoints: Vec<OutPoint> = match self.txs.get_mut(id) {
                    Some(w) => {
                        w.pool = Pool::Pending;
                        w.killed_by = None;
                        if w.tx.is_coinbase {
                            Vec::new()
                        } else {
                            w.tx.inputs.iter().map(|i| i.outpoint()).collect()
                        }
                    }
                    None => Vec::new(),
                };
                for outpoint in outpoints {
                    let owner = outpoint.tx_id.clone();
                    self.claims.insert(outpoint, id.clone());
                    self.reclassify_owner(&owner);
                }
            }
        }

        self.fire_reorganized();
    }

    /// Compute a balance over the current pools
    pub fn balance(&self, kind: BalanceType) -> u64 {
        let mut total = self.pool_value(Pool::Unspent);
        if kind == BalanceType::Estimated {
            total += self.pool_value(Pool::Pending);
        }
        total
    }

    /// Sum of our unclaimed outputs across every transaction in a pool
    fn pool_value(&self, pool: Pool) -> u64 {
        self.order
            .iter()
            .filter_map(|id| self.txs.get(id))
            .filter(|w| w.pool == pool)
            .map(|w| self.unclaimed_value(w))
            .sum()
    }

    fn unclaimed_value(&self, wtx: &WalletTx) -> u64 {
        wtx.tx
            .outputs
            .iter()
            .enumerate()
            .filter(|(i, o)| {
                self.is_mine_output(o)
                    && !self.claims.contains_key(&OutPoint {
                        tx_id: wtx.tx.id.clone(),
                        index: *i as u32,
                    })
            })
            .map(|(_, o)| o.amount)
            .sum()
    }

    /// Build a signed spend of `amount` to `to`, with change back to
    /// our first key. Does not commit anything; pass the result to
    /// [`Wallet::confirm_send`] once it has been broadcast.
    pub fn create_send(&self, to: &str, amount: u64) -> Result<Transaction, WalletError> {
        let change_address = self
            .addresses
            .first()
            .cloned()
            .ok_or_else(|| WalletError::ContractViolation("wallet has no keys".to_string()))?;
        self.create_send_with_change(to, amount, &change_address)
    }

    /// Like [`Wallet::create_send`], but with an explicit change address
    pub fn create_send_with_change(
        &self,
        to: &str,
        amount: u64,
        change_address: &str,
    ) -> Result<Transaction, WalletError> {
        // Gather confirmed, unclaimed outputs in first-seen order.
        let mut gathered = 0u64;
        let mut selected: Vec<(OutPoint, TransactionOutput)> = Vec::new();
        'gather: for id in &self.order {
            let Some(wtx) = self.txs.get(id) else { continue };
            if wtx.pool != Pool::Unspent {
                continue;
            }
            for (i, output) in wtx.tx.outputs.iter().enumerate() {
                let outpoint = OutPoint {
                    tx_id: id.clone(),
                    index: i as u32,
                };
                if self.is_mine_output(output) && !self.claims.contains_key(&outpoint) {
                    gathered += output.amount;
                    selected.push((outpoint, output.clone()));
                    if gathered >= amount {
                        break 'gather;
                    }
                }
            }
        }
        if gathered < amount {
            return Err(WalletError::InsufficientFunds {
                have: self.balance(BalanceType::Available),
                need: amount,
            });
        }

        let mut outputs = vec![TransactionOutput {
            amount,
            recipient: to.to_string(),
        }];
        let change = gathered - amount;
        if change > 0 {
            outputs.push(TransactionOutput {
                amount: change,
                recipient: change_address.to_string(),
            });
        }
        let inputs = selected
            .iter()
            .map(|(op, _)| TransactionInput {
                tx_id: op.tx_id.clone(),
                output_index: op.index,
                signature: String::new(),
                public_key: String::new(),
            })
            .collect();

        let mut tx = Transaction::new(inputs, outputs);
        for (index, (_, consumed)) in selected.iter().enumerate() {
            let key = self
                .keys
                .iter()
                .find(|k| consumed.is_owned_by(&k.address()))
                .ok_or_else(|| {
                    WalletError::ContractViolation(format!(
                        "no key for address {}",
                        consumed.recipient
                    ))
                })?;
            tx.sign_input(index, key)?;
        }
        tx.id = tx.calculate_hash();
        Ok(tx)
    }

    /// The pool a tracked transaction currently sits in
    pub fn pool_of(&self, tx_id: &str) -> Option<Pool> {
        self.txs.get(tx_id).map(|w| w.pool)
    }

    /// Number of transactions in the given pool
    pub fn pool_size(&self, pool: Pool) -> usize {
        self.txs.values().filter(|w| w.pool == pool).count()
    }

    /// Total number of tracked transactions
    pub fn tx_count(&self) -> usize {
        self.txs.len()
    }

    /// The wallet's bookkeeping record for a transaction
    pub fn transaction(&self, tx_id: &str) -> Option<&WalletTx> {
        self.txs.get(tx_id)
    }

    pub fn on_coins_received(
        &mut self,
        handler: impl FnMut(&Transaction, u64, u64) + Send + 'static,
    ) {
        self.listeners.on_coins_received(Box::new(handler));
    }

    pub fn on_transaction_dead(
        &mut self,
        handler: impl FnMut(&Transaction, &Transaction) + Send + 'static,
    ) {
        self.listeners.on_transaction_dead(Box::new(handler));
    }

    pub fn on_reorganized(&mut self, handler: impl FnMut() + Send + 'static) {
        self.listeners.on_reorganized(Box::new(handler));
    }

    /// Save the wallet to a JSON file
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let data = WalletData {
            private_keys: self.keys.iter().map(|k| k.private_key_hex()).collect(),
            transactions: self
                .order
                .iter()
                .filter_map(|id| self.txs.get(id))
                .cloned()
                .collect(),
            claims: self
                .claims
                .iter()
                .map(|(op, id)| (op.clone(), id.clone()))
                .collect(),
        };
        fs::write(path, serde_json::to_string_pretty(&data)?)?;
        Ok(())
    }

    /// Load a wallet previously written by [`Wallet::save`]. Listeners
    /// are not persisted; re-register them after loading.
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let data: WalletData = serde_json::from_str(&fs::read_to_string(path)?)?;
        let mut wallet = Wallet::new();
        for key_hex in &data.private_keys {
            wallet.add_key(KeyPair::from_private_key_hex(key_hex)?);
        }
        for wtx in data.transactions {
            wallet.insert_tx(wtx);
        }
        wallet.claims = data.claims.into_iter().collect();
        Ok(wallet)
    }

    fn insert_tx(&mut self, wtx: WalletTx) {
        let id = wtx.tx.id.clone();
        if self.txs.insert(id.clone(), wtx).is_none() {
            self.order.push(id);
        }
    }

    /// Claim the inputs of `id` that matter to us: those consuming an
    /// output paying this wallet, or contesting an existing claim. A
    /// conflicting claimant is killed. Returns the transactions that
    /// died, each paired with the ID of what replaced it, for event
    /// delivery.
    fn apply_input_claims(&mut self, id: &str) -> Vec<(Transaction, String)> {
        let outpoints: Vec<OutPoint> = match self.txs.get(id) {
            Some(w) if !w.tx.is_coinbase => w
                .tx
                .inputs
                .iter()
                .filter(|input| {
                    self.claims.contains_key(&input.outpoint())
                        || self
                            .consumed_output(input)
                            .is_some_and(|o| self.is_mine_output(o))
                })
                .map(|i| i.outpoint())
                .collect(),
            _ => return Vec::new(),
        };

        let mut dead = Vec::new();
        for outpoint in outpoints {
            if let Some(existing) = self.claims.get(&outpoint).cloned() {
                if existing != id {
                    info!("double spend: {existing} loses {}:{} to {id}", outpoint.tx_id, outpoint.index);
                    self.claims.insert(outpoint, id.to_string());
                    dead.extend(self.kill(&existing, id));
                    continue;
                }
            }
            self.claims.insert(outpoint, id.to_string());
        }
        dead
    }

    /// Mark `victim` dead, release its remaining claims, and propagate
    /// to anything that spent its outputs. Returns every transaction
    /// that died, paired with its killer's ID.
    fn kill(&mut self, victim: &str, killer: &str) -> Vec<(Transaction, String)> {
        let mut dead = Vec::new();
        let mut work = vec![(victim.to_string(), killer.to_string())];
        while let Some((vid, kid)) = work.pop() {
            let Some(wtx) = self.txs.get_mut(&vid) else { continue };
            if wtx.pool == Pool::Dead {
                continue;
            }
            wtx.pool = Pool::Dead;
            wtx.killed_by = Some(kid.clone());
            dead.push((wtx.tx.clone(), kid));

            // The contested outpoint was already reassigned; any claim
            // still pointing at the victim is released.
            let held: Vec<OutPoint> = self
                .claims
                .iter()
                .filter(|(_, claimant)| **claimant == vid)
                .map(|(op, _)| op.clone())
                .collect();
            for outpoint in held {
                self.claims.remove(&outpoint);
                self.reclassify_owner(&outpoint.tx_id);
            }

            // Anything spending an output of the victim is built on
            // sand and dies with it.
            let dependents: Vec<String> = self
                .claims
                .iter()
                .filter(|(op, _)| op.tx_id == vid)
                .map(|(_, claimant)| claimant.clone())
                .collect();
            for dependent in dependents {
                work.push((dependent, vid.clone()));
            }
        }
        dead
    }

    /// Put a best-chain transaction in the unspent or spent pool
    /// depending on whether any of our outputs remain unclaimed.
    fn classify(&mut self, id: &str) {
        let pool = match self.txs.get(id) {
            Some(wtx) => {
                if self.unclaimed_value(wtx) > 0 {
                    Pool::Unspent
                } else {
                    Pool::Spent
                }
            }
            None => return,
        };
        if let Some(wtx) = self.txs.get_mut(id) {
            wtx.pool = pool;
            wtx.killed_by = None;
        }
    }

    /// Re-run classification for a confirmed transaction whose outputs
    /// just gained or lost a claim.
    fn reclassify_owner(&mut self, id: &str) {
        if matches!(self.pool_of(id), Some(Pool::Unspent | Pool::Spent)) {
            self.classify(id);
        }
    }

    fn fire_coins_received(&mut self, tx: &Transaction, before: u64, after: u64) {
        let mut handlers: Vec<CoinsReceivedHandler> =
            std::mem::take(&mut self.listeners.coins_received);
        for handler in &mut handlers {
            handler(tx, before, after);
        }
        handlers.append(&mut self.listeners.coins_received);
        self.listeners.coins_received = handlers;
    }

    fn fire_transaction_dead(&mut self, tx: &Transaction, replacement: &Transaction) {
        let mut handlers: Vec<TransactionDeadHandler> =
            std::mem::take(&mut self.listeners.transaction_dead);
        for handler in &mut handlers {
            handler(tx, replacement);
        }
        handlers.append(&mut self.listeners.transaction_dead);
        self.listeners.transaction_dead = handlers;
    }

    fn fire_reorganized(&mut self) {
        let mut handlers: Vec<ReorganizedHandler> = std::mem::take(&mut self.listeners.reorganized);
        for handler in &mut handlers {
            handler();
        }
        handlers.append(&mut self.listeners.reorganized);
        self.listeners.reorganized = handlers;
    }
}
