// This is the chain itself: an ordered list of blocks rooted at the fixed genesis block
// Every mutation (append or whole-chain replacement) happens under one write lock and bumps
// an epoch counter, which is what a running proof-of-work search watches to know it is stale

use crate::core::monetary::{block_subsidy, Amount};
use crate::core::transaction::total_fee_reward;
use crate::core::{Block, DifficultyAdjustment, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::RecordLog;
use crate::utils::serialized_size;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

/// Cap on the summed serialized weight of one block's transactions (1.5 MiB)
pub const MAX_BLOCK_WEIGHT: u64 = 1024 * 1024 * 3 / 2;

#[derive(Clone)]
pub struct Blockchain {
    blocks: Arc<RwLock<Vec<Block>>>,
    // Moves on every append or replacement
    epoch: Arc<AtomicU64>,
    log: Option<RecordLog>,
    max_block_weight: u64,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// In-memory chain holding only the genesis block
    pub fn new() -> Blockchain {
        Blockchain {
            blocks: Arc::new(RwLock::new(vec![Block::genesis()])),
            epoch: Arc::new(AtomicU64::new(0)),
            log: None,
            max_block_weight: MAX_BLOCK_WEIGHT,
        }
    }

    /// In-memory chain from already known blocks; the whole sequence is validated
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Blockchain> {
        if let Some(index) = Self::find_invalid_block(&blocks) {
            return Err(BlockchainError::Consensus(format!(
                "Chain is invalid at index {index}"
            )));
        }
        let chain = Blockchain::new();
        *chain.write_blocks()? = blocks;
        Ok(chain)
    }

    /// Opens the chain persisted at `path`, replaying and validating every record.
    /// An empty or missing log is seeded with the genesis block.
    pub fn open(path: &Path) -> Result<Blockchain> {
        let log = RecordLog::new(path);
        let mut blocks: Vec<Block> = log.read_all()?;

        if blocks.is_empty() {
            info!("Seeding chain log {} with the genesis block", path.display());
            blocks.push(Block::genesis());
            log.append(&blocks[0])?;
        } else if let Some(index) = Self::find_invalid_block(&blocks) {
            return Err(BlockchainError::Consensus(format!(
                "Persisted chain {} is invalid at index {index}",
                path.display()
            )));
        }

        info!(
            "Opened chain {} at height {}",
            path.display(),
            blocks.last().map(Block::get_height).unwrap_or_default()
        );
        Ok(Blockchain {
            blocks: Arc::new(RwLock::new(blocks)),
            epoch: Arc::new(AtomicU64::new(0)),
            log: Some(log),
            max_block_weight: MAX_BLOCK_WEIGHT,
        })
    }

    pub fn with_max_block_weight(mut self, max_block_weight: u64) -> Blockchain {
        self.max_block_weight = max_block_weight;
        self
    }

    fn read_blocks(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        // Readers only see fully applied mutations, so a poisoned guard is still consistent
        self.blocks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_blocks(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Block>>> {
        self.blocks
            .write()
            .map_err(|_| BlockchainError::Database("Chain lock poisoned".to_string()))
    }

    pub fn len(&self) -> usize {
        self.read_blocks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_blocks().is_empty()
    }

    /// Height of the head block (genesis is 1)
    pub fn get_height(&self) -> u64 {
        self.read_blocks()
            .last()
            .map(Block::get_height)
            .unwrap_or_default()
    }

    pub fn get_last_block(&self) -> Block {
        self.read_blocks()
            .last()
            .cloned()
            .unwrap_or_else(Block::genesis)
    }

    pub fn get_block_by_height(&self, height: u64) -> Option<Block> {
        let index = usize::try_from(height.checked_sub(1)?).ok()?;
        self.read_blocks().get(index).cloned()
    }

    /// Duplicate check for gossiped blocks
    pub fn contains_block(&self, hash_of_all_hashes: &str) -> bool {
        self.read_blocks()
            .iter()
            .any(|block| block.get_hash_of_all_hashes() == hash_of_all_hashes)
    }

    pub fn get_blocks(&self) -> Vec<Block> {
        self.read_blocks().clone()
    }

    pub fn get_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn get_max_block_weight(&self) -> u64 {
        self.max_block_weight
    }

    /// Head block together with the epoch it belongs to
    pub fn get_tip(&self) -> (Block, u64) {
        let blocks = self.read_blocks();
        let head = blocks.last().cloned().unwrap_or_else(Block::genesis);
        (head, self.get_epoch())
    }

    /// Mines `transactions` on top of the current head and appends the result.
    /// The search is abandoned with `MiningAborted` as soon as another block lands.
    pub fn append(&self, transactions: Vec<Transaction>) -> Result<Block> {
        let (head, epoch) = self.get_tip();
        self.mine_on(&head, epoch, transactions, |_| Ok(()))
    }

    /// Mines `transactions` on `head` as it stood at `epoch` and appends the result.
    /// Any chain mutation after `epoch` fails the attempt with `MiningAborted`, even
    /// one that landed before the search started. `on_accept` runs under the chain lock.
    pub fn mine_on<F>(
        &self,
        head: &Block,
        epoch: u64,
        transactions: Vec<Transaction>,
        on_accept: F,
    ) -> Result<Block>
    where
        F: FnOnce(&Block) -> Result<()>,
    {
        let block = Block::mine_block(head, transactions, &|| self.get_epoch() != epoch)?;
        self.insert_block(block.clone(), true, Some(epoch), on_accept)?;
        Ok(block)
    }

    /// Validates `block` against the current head and appends it
    pub fn add_block(&self, block: Block, verify_transactions: bool) -> Result<()> {
        self.insert_block(block, verify_transactions, None, |_| Ok(()))
    }

    /// Same as `add_block`, with `on_accept` run under the chain lock right before the
    /// block is persisted. An error from it rejects the block.
    pub fn add_block_with<F>(
        &self,
        block: Block,
        verify_transactions: bool,
        on_accept: F,
    ) -> Result<()>
    where
        F: FnOnce(&Block) -> Result<()>,
    {
        self.insert_block(block, verify_transactions, None, on_accept)
    }

    fn insert_block<F>(
        &self,
        block: Block,
        verify_transactions: bool,
        expected_epoch: Option<u64>,
        on_accept: F,
    ) -> Result<()>
    where
        F: FnOnce(&Block) -> Result<()>,
    {
        let mut blocks = self.write_blocks()?;
        if expected_epoch.is_some_and(|epoch| epoch != self.get_epoch()) {
            debug!("Chain moved before block {} could be appended", block.get_hash());
            return Err(BlockchainError::MiningAborted);
        }
        let head = blocks
            .last()
            .ok_or_else(|| BlockchainError::Consensus("Chain has no head".to_string()))?;

        Self::check_block(&block, head)?;
        if verify_transactions {
            Self::check_transaction_data(&block, block.get_height(), self.max_block_weight)?;
        }

        on_accept(&block)?;

        if let Some(log) = &self.log {
            log.append(&block)?;
        }
        info!(
            "Appended block {} at height {}",
            block.get_hash(),
            block.get_height()
        );
        blocks.push(block);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Fork choice: adopt `candidate` when it is longer than the local chain and valid
    /// end to end. `on_accept` runs right before the swap, under the chain lock.
    pub fn replace_chain<F>(
        &self,
        candidate: Vec<Block>,
        verify_transactions: bool,
        on_accept: F,
    ) -> Result<()>
    where
        F: FnOnce(&[Block]),
    {
        let mut blocks = self.write_blocks()?;

        if blocks.len() > 1 && candidate.len() <= blocks.len() {
            return Err(BlockchainError::Consensus(format!(
                "Incoming chain must be longer ({} <= {})",
                candidate.len(),
                blocks.len()
            )));
        }

        if let Some(index) = Self::find_invalid_block(&candidate) {
            return Err(BlockchainError::Consensus(format!(
                "Incoming chain is invalid at index {index}"
            )));
        }

        if verify_transactions {
            for block in candidate.iter().skip(1) {
                Self::check_transaction_data(block, block.get_height(), self.max_block_weight)?;
            }
        }

        on_accept(&candidate);

        if let Some(log) = &self.log {
            log.rewrite(&candidate)?;
        }
        info!(
            "Replaced chain of length {} with chain of length {}",
            blocks.len(),
            candidate.len()
        );
        *blocks = candidate;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Checks `candidate` as the direct successor of `previous`
    pub fn check_block(candidate: &Block, previous: &Block) -> Result<()> {
        let height = candidate.get_height();

        let expected = Block::link_hash(previous.get_hash_of_all_hashes(), candidate.get_hash());
        if expected != candidate.get_hash_of_all_hashes() {
            return Err(BlockchainError::Consensus(format!(
                "hashOfAllHashes mismatch at height {height}"
            )));
        }

        if candidate.get_last_hash() != previous.get_hash() {
            return Err(BlockchainError::Consensus(format!(
                "lastHash at height {height} does not match the previous block"
            )));
        }

        if !ProofOfWork::validate(candidate) {
            return Err(BlockchainError::Consensus(format!(
                "Invalid proof-of-work at height {height}"
            )));
        }

        if !DifficultyAdjustment::is_valid_step(previous.get_difficulty(), candidate.get_difficulty())
        {
            return Err(BlockchainError::Consensus(format!(
                "Difficulty jump at height {height}: {} -> {}",
                previous.get_difficulty(),
                candidate.get_difficulty()
            )));
        }

        if height != previous.get_height() + 1 {
            return Err(BlockchainError::Consensus(format!(
                "Height {height} does not follow {}",
                previous.get_height()
            )));
        }

        Ok(())
    }

    pub fn is_valid_block(candidate: &Block, previous: &Block) -> bool {
        match Self::check_block(candidate, previous) {
            Ok(()) => true,
            Err(e) => {
                warn!("Rejected block {}: {e}", candidate.get_hash());
                false
            }
        }
    }

    /// Index of the first block that breaks the chain, `None` for a valid chain.
    /// A chain that does not start with the genesis block fails at index 0.
    pub fn find_invalid_block(chain: &[Block]) -> Option<usize> {
        match chain.first() {
            Some(first) if *first == Block::genesis() => {}
            _ => return Some(0),
        }

        chain
            .windows(2)
            .position(|pair| Self::check_block(&pair[1], &pair[0]).is_err())
            .map(|index| index + 1)
    }

    pub fn is_valid_chain(chain: &[Block]) -> bool {
        match Self::find_invalid_block(chain) {
            None => true,
            Some(index) => {
                warn!("Chain invalid at index {index}");
                false
            }
        }
    }

    /// Transaction rules for `block` minted at `height`: at most one reward worth
    /// exactly subsidy + fees, every transfer valid, no repeats, weight within the cap
    pub fn check_transaction_data(block: &Block, height: u64, max_weight: u64) -> Result<()> {
        let transactions = block.get_transactions();
        let expected_reward = block_subsidy(height)
            .checked_add(total_fee_reward(transactions))
            .ok_or_else(|| BlockchainError::Consensus("Reward overflow".to_string()))?;

        let mut reward_count = 0;
        let mut seen = HashSet::new();
        let mut weight: u64 = 0;

        for transaction in transactions {
            if transaction.is_reward() {
                reward_count += 1;
                if reward_count > 1 {
                    return Err(BlockchainError::Consensus(
                        "reward count exceeds limit".to_string(),
                    ));
                }
                if transaction.get_reward_amount() != expected_reward {
                    return Err(BlockchainError::Consensus(format!(
                        "reward amount {} does not equal {expected_reward}",
                        transaction.get_reward_amount()
                    )));
                }
            } else if !transaction.is_valid() {
                return Err(BlockchainError::Consensus(format!(
                    "invalid transaction {}",
                    transaction.get_id()
                )));
            }

            if !seen.insert(transaction.get_id()) {
                return Err(BlockchainError::Consensus(format!(
                    "transaction {} appears more than once",
                    transaction.get_id()
                )));
            }

            weight = weight.saturating_add(serialized_size(transaction)?);
        }

        if weight > max_weight {
            return Err(BlockchainError::Consensus(format!(
                "transaction weight {weight} exceeds limit {max_weight}"
            )));
        }
        Ok(())
    }

    pub fn is_valid_transaction_data(block: &Block, height: u64, max_weight: u64) -> bool {
        match Self::check_transaction_data(block, height, max_weight) {
            Ok(()) => true,
            Err(e) => {
                warn!("Block {} has invalid transaction data: {e}", block.get_hash());
                false
            }
        }
    }

    /// Balance of `address` from chain history: outputs credited to it, walking back
    /// from the head until (and including) the latest block in which it spent
    pub fn calculate_balance(chain: &[Block], address: &str) -> Amount {
        let mut total = Amount::ZERO;
        for block in chain.iter().rev() {
            let mut spent = false;
            for transaction in block.get_transactions() {
                if transaction.get_input().get_address() == address {
                    spent = true;
                }
                if let Some(value) = transaction.get_output().get(address) {
                    total = total.saturating_add(*value);
                }
            }
            if spent {
                break;
            }
        }
        total
    }

    pub fn get_balance(&self, address: &str) -> Amount {
        Self::calculate_balance(&self.read_blocks(), address)
    }
}
