// The node's view of the network: it owns nothing global, just handles to the chain,
// the pool, the known peers and a transport. Inbound gossip, request handlers,
// catch-up sync and mining all go through here.

use crate::core::{total_fee_reward, Amount, Block, Blockchain, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::message::{
    BestHeight, BlockInfo, BlockMessage, Package, TransactionMessage, NODE_VERSION,
};
use crate::network::{Peer, Peers, Transport};
use crate::storage::{apply_block, balance_of, reindex, Admission, BalanceLedger, TransactionPool};
use crate::wallet::Wallet;
use log::{debug, error, info, warn};
use std::slice;
use std::sync::Arc;
use std::thread;

/// Block weight held back for the reward transaction when selecting from the pool
pub const REWARD_WEIGHT_RESERVE: u64 = 512;

/// Result of one catch-up run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No reachable peer reported a greater height
    UpToDate,
    /// This many blocks were fetched and appended
    Appended(u64),
    /// The local chain was replaced by a longer one of this length
    Replaced(u64),
}

pub struct PeerNetwork {
    self_peer: Peer,
    blockchain: Blockchain,
    pool: Arc<TransactionPool>,
    peers: Arc<Peers>,
    transport: Arc<dyn Transport>,
    ledger: Option<Arc<dyn BalanceLedger>>,
    version: String,
}

impl PeerNetwork {
    pub fn new(
        self_peer: Peer,
        blockchain: Blockchain,
        pool: Arc<TransactionPool>,
        peers: Arc<Peers>,
        transport: Arc<dyn Transport>,
    ) -> PeerNetwork {
        PeerNetwork {
            self_peer,
            blockchain,
            pool,
            peers,
            transport,
            ledger: None,
            version: NODE_VERSION.to_string(),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn BalanceLedger>) -> PeerNetwork {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> PeerNetwork {
        self.version = version.into();
        self
    }

    pub fn get_self_peer(&self) -> &Peer {
        &self.self_peer
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn get_pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn get_peers(&self) -> &Peers {
        &self.peers
    }

    pub fn get_version(&self) -> &str {
        self.version.as_str()
    }

    /// Spendable balance: the ledger when one is attached, chain history otherwise
    pub fn balance_of(&self, address: &str) -> Result<Amount> {
        match &self.ledger {
            Some(ledger) => balance_of(ledger.as_ref(), address),
            None => Ok(self.blockchain.get_balance(address)),
        }
    }

    /// Routes one inbound envelope and returns the response, if the message expects one
    pub fn dispatch(&self, pkg: Package) -> Option<Package> {
        match pkg {
            Package::Transaction(message) => {
                self.receive_transaction(message);
                None
            }
            Package::Block(message) => {
                if let Err(e) = self.receive_block(message) {
                    warn!("Rejected gossiped block: {e}");
                }
                None
            }
            Package::GetBlock { height } => Some(self.handle_get_block(height)),
            Package::GetBestHeight { version } => Some(self.handle_best_height(&version)),
            Package::PeerExchange { requester } => Some(self.handle_peer_exchange(requester)),
            other => {
                warn!("Ignoring unsolicited {other:?}");
                None
            }
        }
    }

    /// Gossiped transaction: drop rewards, invalid ones and resends; otherwise pool it,
    /// learn the sender's peers and forward the message unchanged to everyone but the
    /// sender. Returns true when the transaction was stored.
    pub fn receive_transaction(&self, message: TransactionMessage) -> bool {
        let transaction = &message.transaction;
        if transaction.is_reward() {
            warn!(
                "Dropping reward transaction {} from {}",
                transaction.get_id(),
                message.sender
            );
            return false;
        }
        if !transaction.is_valid() {
            warn!(
                "Dropping invalid transaction {} from {}",
                transaction.get_id(),
                message.sender
            );
            return false;
        }

        match self.pool.admit(transaction.clone()) {
            Admission::Duplicate => {
                debug!("Already pooled transaction {}", transaction.get_id());
                return false;
            }
            Admission::Superseded => info!("Updated pooled transaction {}", transaction.get_id()),
            Admission::New => info!("Pooled transaction {}", transaction.get_id()),
        }

        let mut learned = message.peers.clone();
        learned.push(message.sender.clone());
        self.peers.merge(&learned, Some(&self.self_peer));

        for peer in self.peers.get_peers() {
            if peer != message.sender {
                self.transport.send_transaction(&peer, message.clone());
            }
        }
        true
    }

    /// Gossiped block: duplicates are dropped, a block further ahead than the next
    /// height triggers a sync, anything else must extend the local head. Accepted
    /// blocks are forwarded to everyone but the sender.
    pub fn receive_block(&self, message: BlockMessage) -> Result<bool> {
        let BlockMessage { block, info } = message;
        if info.version != self.version {
            warn!("Dropping block from {} running {}", info.sender, info.version);
            return Err(BlockchainError::VersionMismatch {
                local: self.version.clone(),
                remote: info.version,
            });
        }
        if self.blockchain.contains_block(block.get_hash_of_all_hashes()) {
            debug!("Already have block {}", block.get_hash());
            return Ok(false);
        }
        self.peers.merge(slice::from_ref(&info.sender), Some(&self.self_peer));

        let local = self.blockchain.get_height();
        if block.get_height() > local + 1 {
            info!(
                "Block at height {} from {} is ahead of local height {local}",
                block.get_height(),
                info.sender
            );
            self.sync()?;
            if !self.blockchain.contains_block(block.get_hash_of_all_hashes()) {
                return Ok(false);
            }
        } else {
            self.accept_block(block.clone())?;
        }

        self.forward_block(&block, Some(&info.sender));
        Ok(true)
    }

    fn accept_block(&self, block: Block) -> Result<()> {
        self.blockchain
            .add_block_with(block, true, |accepted| self.after_accept(accepted))
    }

    // Runs under the chain lock, so ledger updates land in chain order
    fn after_accept(&self, block: &Block) -> Result<()> {
        let settled = self.pool.settle(slice::from_ref(block));
        if settled > 0 {
            debug!("Settled {settled} pooled transactions");
        }
        if let Some(ledger) = &self.ledger {
            apply_block(ledger.as_ref(), block).map_err(|e| {
                error!("Could not update balances for block {}: {e}", block.get_hash());
                e
            })?;
        }
        Ok(())
    }

    fn forward_block(&self, block: &Block, except: Option<&Peer>) {
        let message = BlockMessage {
            block: block.clone(),
            info: BlockInfo {
                height: block.get_height(),
                sender: self.self_peer.clone(),
                version: self.version.clone(),
            },
        };
        for peer in self.peers.get_peers() {
            if Some(&peer) != except {
                self.transport.send_block(&peer, message.clone());
            }
        }
    }

    pub fn broadcast_block(&self, block: &Block) {
        self.forward_block(block, None);
    }

    pub fn broadcast_transaction(&self, transaction: &Transaction) {
        let message = TransactionMessage {
            transaction: transaction.clone(),
            sender: self.self_peer.clone(),
            peers: self.peers.get_peers(),
        };
        for peer in self.peers.get_peers() {
            self.transport.send_transaction(&peer, message.clone());
        }
    }

    /// Pools a locally created transaction and announces it
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<()> {
        if transaction.is_reward() || !transaction.is_valid() {
            return Err(BlockchainError::Validation(format!(
                "Transaction {} is not a valid transfer",
                transaction.get_id()
            )));
        }
        if self.pool.admit(transaction.clone()) == Admission::Duplicate {
            return Err(BlockchainError::Validation(format!(
                "Transaction {} is already pooled",
                transaction.get_id()
            )));
        }
        info!("Submitted transaction {}", transaction.get_id());
        self.broadcast_transaction(&transaction);
        Ok(())
    }

    /// Pays `recipient` from `wallet`. A transfer the wallet still has pending is
    /// extended, otherwise a new one is drawn against the current balance.
    pub fn transact(
        &self,
        wallet: &Wallet,
        recipient: &str,
        amount: Amount,
        fee: Option<Amount>,
        message: Option<String>,
    ) -> Result<Transaction> {
        let sender = wallet.get_address();
        let transaction = match self.pool.find_by_input_address(&sender) {
            Some(mut pending) => {
                pending.update(wallet, recipient, amount, fee, message)?;
                pending
            }
            None => Transaction::create_transfer(
                wallet,
                recipient,
                amount,
                self.balance_of(&sender)?,
                fee,
                message,
            )?,
        };
        self.submit_transaction(transaction.clone())?;
        Ok(transaction)
    }

    pub fn handle_get_block(&self, height: u64) -> Package {
        Package::BlockData {
            block: self.blockchain.get_block_by_height(height),
        }
    }

    /// Always answers with the local height and version; the requester decides
    pub fn handle_best_height(&self, version: &str) -> Package {
        if version != self.version {
            warn!("Height probe from a node running {version}");
        }
        Package::BestHeight(BestHeight {
            height: self.blockchain.get_height(),
            version: self.version.clone(),
        })
    }

    pub fn handle_peer_exchange(&self, requester: Peer) -> Package {
        let peers = self
            .peers
            .get_peers()
            .into_iter()
            .filter(|peer| *peer != requester)
            .collect();
        self.peers
            .merge(slice::from_ref(&requester), Some(&self.self_peer));
        Package::PeerList { peers }
    }

    /// Asks every known peer for its peers. Returns how many new ones were learned.
    pub fn exchange_peers(&self) -> usize {
        let mut learned = 0;
        for peer in self.peers.get_peers() {
            match self.transport.request_peer_exchange(&peer, &self.self_peer) {
                Ok(list) => learned += self.peers.merge(&list, Some(&self.self_peer)).len(),
                Err(e) => warn!("Peer exchange with {peer} failed: {e}"),
            }
        }
        learned
    }

    fn probe(&self, peer: &Peer) -> Result<u64> {
        let best = self.transport.request_best_height(peer, &self.version)?;
        if best.version != self.version {
            return Err(BlockchainError::VersionMismatch {
                local: self.version.clone(),
                remote: best.version,
            });
        }
        Ok(best.height)
    }

    /// Compatible peers and the heights they report, highest first
    fn probe_heights(&self) -> Vec<(Peer, u64)> {
        let peers = self.peers.get_peers();
        let mut reports: Vec<(Peer, u64)> = thread::scope(|scope| {
            let probes: Vec<_> = peers
                .iter()
                .map(|peer| scope.spawn(move || (peer, self.probe(peer))))
                .collect();
            probes
                .into_iter()
                .filter_map(|probe| probe.join().ok())
                .filter_map(|(peer, result)| match result {
                    Ok(height) => Some((peer.clone(), height)),
                    Err(e) => {
                        warn!("Skipping {peer} for sync: {e}");
                        None
                    }
                })
                .collect()
        });
        reports.sort_by(|a, b| b.1.cmp(&a.1));
        reports
    }

    /// Catch-up: probe every peer, then fetch each missing height in order from the
    /// first peer that supplies it. A height no peer can supply aborts the run.
    pub fn sync(&self) -> Result<SyncOutcome> {
        let sources = self.probe_heights();
        let local = self.blockchain.get_height();
        let best = match sources.first() {
            Some((_, height)) if *height > local => *height,
            _ => {
                debug!("Up to date at height {local}");
                return Ok(SyncOutcome::UpToDate);
            }
        };
        info!("Syncing from height {local} to {best}");

        for height in local + 1..=best {
            if self.blockchain.get_height() >= height {
                continue;
            }
            let mut fetched = false;
            let mut appended = false;
            for (peer, reported) in sources.iter().filter(|(_, h)| *h >= height) {
                let block = match self.transport.request_block(peer, height) {
                    Ok(Some(block)) if block.get_height() == height => block,
                    Ok(_) => {
                        warn!("{peer} did not supply block {height} (reported {reported})");
                        continue;
                    }
                    Err(e) => {
                        warn!("Could not fetch block {height} from {peer}: {e}");
                        continue;
                    }
                };
                fetched = true;
                match self.accept_block(block) {
                    Ok(()) => {
                        appended = true;
                        break;
                    }
                    Err(BlockchainError::Consensus(reason)) => {
                        warn!("Block {height} from {peer} does not extend the chain: {reason}")
                    }
                    Err(e) => return Err(e),
                }
            }

            if appended {
                continue;
            }
            if height == local + 1 && fetched {
                return self.recover_fork(&sources);
            }
            return Err(BlockchainError::Network(format!(
                "Block {height} could not be obtained from any peer"
            )));
        }

        info!("Synced {} blocks", best - local);
        Ok(SyncOutcome::Appended(best - local))
    }

    /// The peers' chains diverge from ours: download a whole chain, highest peer first,
    /// and hand it to fork choice
    fn recover_fork(&self, sources: &[(Peer, u64)]) -> Result<SyncOutcome> {
        for (peer, reported) in sources {
            info!("Downloading chain of height {reported} from {peer}");
            let candidate = match self.download_chain(peer, *reported) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!("Could not download chain from {peer}: {e}");
                    continue;
                }
            };
            let length = candidate.len() as u64;
            let mut reindexed = Ok(());
            match self.blockchain.replace_chain(candidate, true, |blocks| {
                self.pool.settle(blocks);
                if let Some(ledger) = &self.ledger {
                    reindexed = reindex(ledger.as_ref(), blocks);
                }
            }) {
                Ok(()) => {
                    reindexed?;
                    return Ok(SyncOutcome::Replaced(length));
                }
                Err(BlockchainError::Consensus(reason)) => {
                    warn!("Chain from {peer} rejected: {reason}")
                }
                Err(e) => return Err(e),
            }
        }
        Err(BlockchainError::Consensus(
            "No peer supplied a chain that could replace the local one".to_string(),
        ))
    }

    fn download_chain(&self, peer: &Peer, height: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for h in 1..=height {
            match self.transport.request_block(peer, h)? {
                Some(block) if block.get_height() == h => blocks.push(block),
                _ => {
                    return Err(BlockchainError::Network(format!(
                        "{peer} did not supply block {h}"
                    )))
                }
            }
        }
        Ok(blocks)
    }

    /// Mines the best pooled transactions plus the reward for `miner` on the current
    /// head. Nothing happens when the pool is empty; a competing block landing during
    /// the search abandons it.
    pub fn mine_pending(&self, miner: &str) -> Result<Option<Block>> {
        // Pinned before selection; any block accepted after this aborts the search
        let (head, epoch) = self.blockchain.get_tip();
        let max_weight = self
            .blockchain
            .get_max_block_weight()
            .saturating_sub(REWARD_WEIGHT_RESERVE);
        let mut transactions = self.pool.select_for_mining(max_weight);
        if transactions.is_empty() {
            debug!("No pending transactions to mine");
            return Ok(None);
        }

        let height = head.get_height() + 1;
        let reward = Transaction::new_reward(miner, height, total_fee_reward(&transactions), None)?;
        transactions.push(reward);

        let mined = self
            .blockchain
            .mine_on(&head, epoch, transactions, |block| self.after_accept(block));
        match mined {
            Ok(block) => {
                info!(
                    "Mined block {} at height {} with {} transactions",
                    block.get_hash(),
                    block.get_height(),
                    block.get_transactions().len()
                );
                self.broadcast_block(&block);
                Ok(Some(block))
            }
            Err(BlockchainError::MiningAborted) => {
                info!("Mining at height {height} abandoned, the head moved");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
