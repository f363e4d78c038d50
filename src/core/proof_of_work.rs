use crate::core::{Block, Transaction};
use crate::error::Result;
use crate::utils::{hash_encoded_parts, hex_decode};
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;

/// Hashing context for one mining attempt. The parts of the block hash that do not
/// change between nonces are encoded once up front.
pub struct ProofOfWork {
    last_hash: String,
    transactions: String,
}

impl ProofOfWork {
    pub fn new_proof_of_work(last_hash: &str, transactions: &[Transaction]) -> Result<ProofOfWork> {
        Ok(ProofOfWork {
            last_hash: serde_json::to_string(last_hash)?,
            transactions: serde_json::to_string(transactions)?,
        })
    }

    /// H(timestamp, lastHash, transactions, nonce, difficulty)
    pub fn hash(&self, timestamp: i64, nonce: u64, difficulty: u32) -> String {
        hash_encoded_parts(vec![
            timestamp.to_string(),
            self.last_hash.clone(),
            self.transactions.clone(),
            nonce.to_string(),
            difficulty.to_string(),
        ])
    }

    /// True when the hash has at least `difficulty` leading zero bits
    pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
        if difficulty > 256 {
            return false;
        }
        let bytes = match hex_decode(hash) {
            Ok(bytes) if bytes.len() == 32 => bytes,
            _ => return false,
        };

        let mut target = BigInt::from(1);
        target.shl_assign(256 - difficulty);
        BigInt::from_bytes_be(Sign::Plus, bytes.as_slice()) < target
    }

    /// Recomputes the block hash from its declared fields and checks the work behind it
    pub fn validate(block: &Block) -> bool {
        let pow = match ProofOfWork::new_proof_of_work(block.get_last_hash(), block.get_transactions())
        {
            Ok(pow) => pow,
            Err(_) => return false,
        };
        let hash = pow.hash(block.get_timestamp(), block.get_nonce(), block.get_difficulty());
        hash == block.get_hash() && Self::meets_difficulty(&hash, block.get_difficulty())
    }
}
