use crate::core::monetary::{block_subsidy, Amount};
use crate::core::transaction::{total_fee_reward, transaction_volume};
use crate::core::{DifficultyAdjustment, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{crypto_hash, current_timestamp, serialized_size};
use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;

const GENESIS_TIMESTAMP: i64 = 1_626_071_497_054;
const GENESIS_HASH: &str = "*None*";

static GENESIS: Lazy<Block> = Lazy::new(|| {
    let difficulty = DifficultyAdjustment::get_initial_difficulty();
    let block_size = serialized_size(&(
        GENESIS_TIMESTAMP,
        GENESIS_HASH,
        Vec::<Transaction>::new(),
        difficulty,
        0u64,
        GENESIS_HASH,
    ))
    .unwrap_or_default();

    Block {
        timestamp: GENESIS_TIMESTAMP,
        last_hash: GENESIS_HASH.to_string(),
        hash: GENESIS_HASH.to_string(),
        transactions: vec![],
        nonce: 0,
        difficulty,
        block_size,
        transaction_volume: Amount::ZERO,
        block_reward: Amount::ZERO,
        fee_reward: Amount::ZERO,
        blockchain_height: 1,
        hash_of_all_hashes: crypto_hash(&[json!(GENESIS_HASH)]),
    }
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    timestamp: i64,
    last_hash: String,
    hash: String,
    transactions: Vec<Transaction>,
    nonce: u64,
    difficulty: u32,
    block_size: u64,
    transaction_volume: Amount,
    block_reward: Amount,
    fee_reward: Amount,
    blockchain_height: u64,
    hash_of_all_hashes: String,
}

impl Block {
    /// The fixed root of every chain
    pub fn genesis() -> Block {
        GENESIS.clone()
    }

    /// Runs the proof-of-work search on top of `last` with the wall clock.
    /// `abort` is polled before every attempt.
    pub fn mine_block(
        last: &Block,
        transactions: Vec<Transaction>,
        abort: &dyn Fn() -> bool,
    ) -> Result<Block> {
        Self::mine_block_with_clock(last, transactions, abort, &mut current_timestamp)
    }

    /// Proof-of-work search with an explicit time source. Every attempt takes a
    /// fresh timestamp and retargets the difficulty from it.
    pub fn mine_block_with_clock(
        last: &Block,
        transactions: Vec<Transaction>,
        abort: &dyn Fn() -> bool,
        clock: &mut dyn FnMut() -> Result<i64>,
    ) -> Result<Block> {
        let height = last.blockchain_height + 1;
        let pow = ProofOfWork::new_proof_of_work(&last.hash, &transactions)?;
        info!(
            "Starting proof-of-work for block at height {height} with {} transactions",
            transactions.len()
        );

        let mut nonce: u64 = 0;
        let (timestamp, difficulty, hash) = loop {
            if abort() {
                debug!("Proof-of-work for height {height} aborted after {nonce} attempts");
                return Err(BlockchainError::MiningAborted);
            }
            nonce = nonce
                .checked_add(1)
                .ok_or_else(|| BlockchainError::Consensus("Nonce space exhausted".to_string()))?;
            let timestamp = clock()?;
            let difficulty = DifficultyAdjustment::adjust_difficulty(last, timestamp);
            let hash = pow.hash(timestamp, nonce, difficulty);
            if ProofOfWork::meets_difficulty(&hash, difficulty) {
                break (timestamp, difficulty, hash);
            }
        };

        let block_size = serialized_size(&(
            timestamp,
            &last.hash,
            &transactions,
            difficulty,
            nonce,
            &hash,
        ))?;
        let block = Block {
            timestamp,
            last_hash: last.hash.clone(),
            hash_of_all_hashes: Self::link_hash(&last.hash_of_all_hashes, &hash),
            hash,
            transaction_volume: transaction_volume(&transactions),
            fee_reward: total_fee_reward(&transactions),
            block_reward: block_subsidy(height),
            transactions,
            nonce,
            difficulty,
            block_size,
            blockchain_height: height,
        };
        info!(
            "Proof-of-work completed for block {} (height: {height}, difficulty: {difficulty}, nonce: {nonce})",
            block.hash
        );
        Ok(block)
    }

    /// H(previous.hashOfAllHashes, hash)
    pub fn link_hash(previous_hash_of_all_hashes: &str, hash: &str) -> String {
        crypto_hash(&[json!(previous_hash_of_all_hashes), json!(hash)])
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_last_hash(&self) -> &str {
        self.last_hash.as_str()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_block_size(&self) -> u64 {
        self.block_size
    }

    pub fn get_transaction_volume(&self) -> Amount {
        self.transaction_volume
    }

    pub fn get_block_reward(&self) -> Amount {
        self.block_reward
    }

    pub fn get_fee_reward(&self) -> Amount {
        self.fee_reward
    }

    pub fn get_height(&self) -> u64 {
        self.blockchain_height
    }

    pub fn get_hash_of_all_hashes(&self) -> &str {
        self.hash_of_all_hashes.as_str()
    }
}
