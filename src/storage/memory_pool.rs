use crate::core::{Block, Transaction, UNITS_PER_COIN};
use crate::utils::serialized_size;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Scale applied to the fee before dividing by the serialized size
const FEE_DENSITY_SCALE: u128 = 1024 * 1024;

/// Outcome of offering a gossiped transaction to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Same sender and same input timestamp as a pooled transaction: dropped
    Duplicate,
    /// Same sender, different timestamp: stored, replaces an older version with the same id
    Superseded,
    /// First transaction seen from this sender
    New,
}

struct PoolEntry {
    // Arrival order, kept when the id is overwritten
    seq: u64,
    transaction: Transaction,
}

#[derive(Default)]
struct PoolState {
    transactions: HashMap<String, PoolEntry>,
    next_seq: u64,
}

impl PoolState {
    fn insert(&mut self, tx: Transaction) {
        let id = tx.get_id().to_string();
        match self.transactions.get_mut(&id) {
            Some(entry) => entry.transaction = tx,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.transactions.insert(
                    id,
                    PoolEntry {
                        seq,
                        transaction: tx,
                    },
                );
            }
        }
    }

    fn find_by_input_address(&self, address: &str) -> Option<&Transaction> {
        self.transactions
            .values()
            .map(|entry| &entry.transaction)
            .filter(|tx| tx.get_input().get_address() == address)
            .max_by_key(|tx| tx.get_input().get_timestamp())
    }

    fn ordered(&self) -> Vec<(u64, Transaction)> {
        let mut entries: Vec<(u64, Transaction)> = self
            .transactions
            .values()
            .map(|entry| (entry.seq, entry.transaction.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries
    }
}

/// Unconfirmed transactions keyed by id ( K -> transaction id, V => Transaction )
pub struct TransactionPool {
    inner: RwLock<PoolState>,
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionPool {
    pub fn new() -> TransactionPool {
        TransactionPool {
            inner: RwLock::new(PoolState::default()),
        }
    }

    /// Insert, or overwrite the transaction with the same id
    pub fn put(&self, tx: Transaction) {
        match self.inner.write() {
            Ok(mut pool) => pool.insert(tx),
            Err(_) => {
                log::error!("Failed to acquire write lock on transaction pool");
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.transactions.get(id).map(|e| e.transaction.clone()),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                None
            }
        }
    }

    /// The most recent pooled transaction spent from `address`
    pub fn find_by_input_address(&self, address: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.find_by_input_address(address).cloned(),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                None
            }
        }
    }

    /// Dedup-and-store in one step: a transaction with the same sender and input
    /// timestamp as a pooled one is a resend, anything else is stored.
    pub fn admit(&self, tx: Transaction) -> Admission {
        let mut pool = match self.inner.write() {
            Ok(pool) => pool,
            Err(_) => {
                log::error!("Failed to acquire write lock on transaction pool");
                return Admission::Duplicate;
            }
        };

        let timestamp = tx.get_input().get_timestamp();
        if let Some(stored) = pool.transactions.get(tx.get_id()) {
            // an older copy of a transaction we already hold in a newer version
            if stored.transaction.get_input().get_timestamp() >= timestamp {
                return Admission::Duplicate;
            }
        }

        let admission = match pool.find_by_input_address(tx.get_input().get_address()) {
            Some(existing) if existing.get_input().get_timestamp() == timestamp => {
                return Admission::Duplicate;
            }
            Some(_) => Admission::Superseded,
            None => Admission::New,
        };
        pool.insert(tx);
        admission
    }

    pub fn contains(&self, id: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.transactions.contains_key(id),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                false
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<Transaction> {
        match self.inner.write() {
            Ok(mut pool) => pool.transactions.remove(id).map(|e| e.transaction),
            Err(_) => {
                log::error!("Failed to acquire write lock on transaction pool");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.transactions.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.transactions.is_empty(),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                true // Conservative default
            }
        }
    }

    /// Every pooled transaction in arrival order
    pub fn get_all(&self) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.ordered().into_iter().map(|(_, tx)| tx).collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                Vec::new()
            }
        }
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.transactions.clear();
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on transaction pool");
            }
        }
    }

    pub fn is_valid(tx: &Transaction) -> bool {
        tx.is_valid()
    }

    /// Pooled transactions that pass validation, in arrival order. Invalid ones stay pooled.
    pub fn valid_transactions(&self) -> Vec<Transaction> {
        self.get_all()
            .into_iter()
            .filter(TransactionPool::is_valid)
            .collect()
    }

    /// Highest fee density first under a hard weight cap. Valid transactions are bucketed
    /// by `ceil(fee * 2^20 / size)`; buckets are drained in descending order, arrival order
    /// inside a bucket, and selection ends at the first transaction that would cross the cap.
    pub fn select_for_mining(&self, max_weight: u64) -> Vec<Transaction> {
        let entries = match self.inner.read() {
            Ok(pool) => pool.ordered(),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                return Vec::new();
            }
        };

        let mut buckets: BTreeMap<u128, Vec<(Transaction, u64)>> = BTreeMap::new();
        for (_, tx) in entries {
            if !tx.is_valid() {
                continue;
            }
            let size = match serialized_size(&tx) {
                Ok(size) if size > 0 => size,
                _ => continue,
            };
            buckets
                .entry(fee_density(&tx, size))
                .or_default()
                .push((tx, size));
        }

        let mut selected = vec![];
        let mut weight: u64 = 0;
        for (tx, size) in buckets.into_values().rev().flatten() {
            if weight.saturating_add(size) > max_weight {
                log::info!(
                    "Selected {} transactions ({weight} of {max_weight} weight)",
                    selected.len()
                );
                return selected;
            }
            weight += size;
            selected.push(tx);
        }
        selected
    }

    /// Drops every transaction contained in `blocks`. Returns how many were removed.
    pub fn settle(&self, blocks: &[Block]) -> usize {
        match self.inner.write() {
            Ok(mut pool) => {
                let before = pool.transactions.len();
                for tx in blocks.iter().flat_map(Block::get_transactions) {
                    pool.transactions.remove(tx.get_id());
                }
                before - pool.transactions.len()
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on transaction pool");
                0
            }
        }
    }
}

fn fee_density(tx: &Transaction, size: u64) -> u128 {
    let numerator = u128::from(tx.get_fee().units()) * FEE_DENSITY_SCALE;
    let denominator = u128::from(size) * u128::from(UNITS_PER_COIN);
    numerator.div_ceil(denominator)
}
