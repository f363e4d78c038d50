//! Test utilities for chain and network testing

use crate::core::{Amount, Block, Blockchain, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::message::{BestHeight, BlockMessage, TransactionMessage};
use crate::network::{Peer, Transport};
use crate::wallet::Wallet;
use std::sync::Mutex;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| BlockchainError::Io(e.to_string()))
}

/// Mines on top of `last` with a clock that runs well past the mine rate, so every
/// block lowers the difficulty and the search stays cheap
pub fn mine_cheap_block(last: &Block, transactions: Vec<Transaction>) -> Block {
    let mut now = last.get_timestamp() + 60_000;
    Block::mine_block_with_clock(last, transactions, &|| false, &mut || -> Result<i64> {
        now += 1;
        Ok(now)
    })
    .expect("cheap mining should not fail")
}

pub fn reward_for(miner: &Wallet, height: u64, fee_reward: Amount) -> Transaction {
    Transaction::new_reward(&miner.get_address(), height, fee_reward, None)
        .expect("reward for a valid address")
}

/// Chain of genesis plus one block whose reward credits the returned wallet
pub fn funded_chain() -> (Blockchain, Wallet, Block) {
    let wallet = Wallet::new().expect("wallet");
    let chain = Blockchain::new();
    let block = mine_cheap_block(
        &chain.get_last_block(),
        vec![reward_for(&wallet, 2, Amount::ZERO)],
    );
    chain
        .add_block(block.clone(), true)
        .expect("funding block is valid");
    (chain, wallet, block)
}

/// Signed transfer of `amount` coins drawn from the sender's balance on `chain`
pub fn transfer_on(
    chain: &Blockchain,
    sender: &Wallet,
    recipient: &str,
    amount: u64,
    fee: u64,
) -> Transaction {
    Transaction::create_transfer(
        sender,
        recipient,
        Amount::from_coins(amount),
        chain.get_balance(&sender.get_address()),
        Some(Amount::from_coins(fee)),
        None,
    )
    .expect("transfer within balance")
}

/// Transport that keeps every outbound message and answers no requests
#[derive(Default)]
pub struct RecordingTransport {
    transactions: Mutex<Vec<(Peer, TransactionMessage)>>,
    blocks: Mutex<Vec<(Peer, BlockMessage)>>,
}

impl RecordingTransport {
    pub fn sent_transactions(&self) -> Vec<(Peer, TransactionMessage)> {
        self.transactions.lock().unwrap().clone()
    }

    pub fn sent_blocks(&self) -> Vec<(Peer, BlockMessage)> {
        self.blocks.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn send_transaction(&self, peer: &Peer, message: TransactionMessage) {
        self.transactions
            .lock()
            .unwrap()
            .push((peer.clone(), message));
    }

    fn send_block(&self, peer: &Peer, message: BlockMessage) {
        self.blocks.lock().unwrap().push((peer.clone(), message));
    }

    fn request_block(&self, peer: &Peer, _height: u64) -> Result<Option<Block>> {
        Err(BlockchainError::Network(format!("{peer} is offline")))
    }

    fn request_best_height(&self, peer: &Peer, _version: &str) -> Result<BestHeight> {
        Err(BlockchainError::Network(format!("{peer} is offline")))
    }

    fn request_peer_exchange(&self, peer: &Peer, _requester: &Peer) -> Result<Vec<Peer>> {
        Err(BlockchainError::Network(format!("{peer} is offline")))
    }
}
