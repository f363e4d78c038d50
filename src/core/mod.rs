//! Core blockchain functionality
//!
//! Amounts, transactions, blocks, proof-of-work, difficulty retargeting
//! and the chain with its validation and fork-choice rules.

pub mod block;
pub mod blockchain;
pub mod difficulty;
pub mod monetary;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, MAX_BLOCK_WEIGHT};
pub use difficulty::DifficultyAdjustment;
pub use monetary::{block_subsidy, Amount, INITIAL_BLOCK_REWARD, UNITS_PER_COIN};
pub use proof_of_work::ProofOfWork;
pub use transaction::{
    total_fee_reward, transaction_volume, OutputMap, Transaction, TransactionInput,
};
