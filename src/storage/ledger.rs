use crate::core::{Amount, Block};
use crate::error::{BlockchainError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const BALANCES_TREE: &str = "balances";

/// Indexed balance of one address and the block that last wrote it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub balance: Amount,
    pub height: u64,
    pub timestamp: i64,
}

/// Durable address → balance index, updated after every accepted block
pub trait BalanceLedger: Send + Sync {
    fn get(&self, address: &str) -> Result<Option<BalanceRecord>>;

    fn put(&self, address: &str, record: &BalanceRecord) -> Result<()>;

    /// Drops every record, used before re-indexing a replaced chain
    fn clear(&self) -> Result<()>;
}

/// Ledger kept in a sled tree, values are JSON-encoded records
pub struct SledLedger {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledLedger {
    pub fn open(path: &Path) -> Result<SledLedger> {
        let db = sled::open(path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open ledger: {e}")))?;
        Self::from_db(db)
    }

    /// Ledger that disappears with the process
    pub fn temporary() -> Result<SledLedger> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| BlockchainError::Database(format!("Failed to open ledger: {e}")))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<SledLedger> {
        let tree = db.open_tree(BALANCES_TREE).map_err(|e| {
            BlockchainError::Database(format!("Failed to open balances tree: {e}"))
        })?;
        Ok(SledLedger { db, tree })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl BalanceLedger for SledLedger {
    fn get(&self, address: &str) -> Result<Option<BalanceRecord>> {
        match self.tree.get(address)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, address: &str, record: &BalanceRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.tree.insert(address, bytes)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.tree.clear()?;
        Ok(())
    }
}

/// Indexed balance of `address`, zero when the ledger has never seen it
pub fn balance_of(ledger: &dyn BalanceLedger, address: &str) -> Result<Amount> {
    Ok(ledger
        .get(address)?
        .map(|record| record.balance)
        .unwrap_or_default())
}

/// Folds the balance effects of `block` into the ledger. Rewards credit the miner;
/// a transfer overwrites the sender with its change output and credits everyone else.
/// Addresses already written at this height or later are left alone, so applying the
/// same block twice changes nothing. Returns the number of records written.
pub fn apply_block(ledger: &dyn BalanceLedger, block: &Block) -> Result<usize> {
    let height = block.get_height();
    let mut effects: HashMap<String, Amount> = HashMap::new();
    let mut stored: HashMap<String, Amount> = HashMap::new();

    for tx in block.get_transactions() {
        let sender = tx.get_input().get_address();
        for (address, value) in tx.get_output() {
            let balance = if !tx.is_reward() && address == sender {
                *value
            } else {
                current_balance(ledger, &mut stored, &effects, address)?.saturating_add(*value)
            };
            effects.insert(address.clone(), balance);
        }
    }

    let mut written = 0;
    for (address, balance) in effects {
        if let Some(existing) = ledger.get(&address)? {
            if existing.height >= height {
                debug!("Ledger already holds {address} at height {}", existing.height);
                continue;
            }
        }
        ledger.put(
            &address,
            &BalanceRecord {
                balance,
                height,
                timestamp: block.get_timestamp(),
            },
        )?;
        written += 1;
    }
    Ok(written)
}

fn current_balance(
    ledger: &dyn BalanceLedger,
    stored: &mut HashMap<String, Amount>,
    effects: &HashMap<String, Amount>,
    address: &str,
) -> Result<Amount> {
    if let Some(balance) = effects.get(address) {
        return Ok(*balance);
    }
    if let Some(balance) = stored.get(address) {
        return Ok(*balance);
    }
    let balance = balance_of(ledger, address)?;
    stored.insert(address.to_string(), balance);
    Ok(balance)
}

/// Rebuilds the ledger from scratch for `blocks`
pub fn reindex(ledger: &dyn BalanceLedger, blocks: &[Block]) -> Result<()> {
    ledger.clear()?;
    for block in blocks {
        apply_block(ledger, block)?;
    }
    info!("Re-indexed balances for {} blocks", blocks.len());
    Ok(())
}
