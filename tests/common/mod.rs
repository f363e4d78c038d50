//! In-process network for multi-node tests
//!
//! Nodes register with a shared `LoopbackTransport`, which hands every
//! envelope straight to the target node's dispatcher on the caller's thread.

#![allow(dead_code)]

use relay_chain::core::{Amount, Block, Blockchain, Transaction};
use relay_chain::error::{BlockchainError, Result};
use relay_chain::network::{
    BestHeight, BlockMessage, Package, Peer, PeerNetwork, Peers, TransactionMessage, Transport,
};
use relay_chain::storage::{SledLedger, TransactionPool};
use relay_chain::wallet::Wallet;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};

#[derive(Default)]
pub struct LoopbackTransport {
    nodes: RwLock<HashMap<Peer, Weak<PeerNetwork>>>,
    offline: RwLock<HashSet<Peer>>,
    withholding: RwLock<HashSet<Peer>>,
}

impl LoopbackTransport {
    pub fn new() -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport::default())
    }

    pub fn register(&self, network: &Arc<PeerNetwork>) {
        self.nodes
            .write()
            .unwrap()
            .insert(network.get_self_peer().clone(), Arc::downgrade(network));
    }

    /// An offline peer drops sends and fails every request
    pub fn set_offline(&self, peer: &Peer, offline: bool) {
        let mut set = self.offline.write().unwrap();
        if offline {
            set.insert(peer.clone());
        } else {
            set.remove(peer);
        }
    }

    /// A withholding peer answers height probes but not block requests
    pub fn set_withholding(&self, peer: &Peer, withholding: bool) {
        let mut set = self.withholding.write().unwrap();
        if withholding {
            set.insert(peer.clone());
        } else {
            set.remove(peer);
        }
    }

    fn node(&self, peer: &Peer) -> Result<Arc<PeerNetwork>> {
        if self.offline.read().unwrap().contains(peer) {
            return Err(BlockchainError::Network(format!("{peer} is offline")));
        }
        self.nodes
            .read()
            .unwrap()
            .get(peer)
            .and_then(Weak::upgrade)
            .ok_or_else(|| BlockchainError::Network(format!("{peer} is unknown")))
    }

    fn deliver(&self, peer: &Peer, pkg: Package) {
        if let Ok(node) = self.node(peer) {
            node.dispatch(pkg);
        }
    }

    fn request(&self, peer: &Peer, pkg: Package) -> Result<Package> {
        self.node(peer)?
            .dispatch(pkg)
            .ok_or_else(|| BlockchainError::Network(format!("{peer} sent no response")))
    }
}

impl Transport for LoopbackTransport {
    fn send_transaction(&self, peer: &Peer, message: TransactionMessage) {
        self.deliver(peer, Package::Transaction(message));
    }

    fn send_block(&self, peer: &Peer, message: BlockMessage) {
        self.deliver(peer, Package::Block(message));
    }

    fn request_block(&self, peer: &Peer, height: u64) -> Result<Option<Block>> {
        if self.withholding.read().unwrap().contains(peer) {
            return Err(BlockchainError::Network(format!("{peer} timed out")));
        }
        match self.request(peer, Package::GetBlock { height })? {
            Package::BlockData { block } => Ok(block),
            other => Err(BlockchainError::Network(format!("unexpected {other:?}"))),
        }
    }

    fn request_best_height(&self, peer: &Peer, version: &str) -> Result<BestHeight> {
        let pkg = Package::GetBestHeight {
            version: version.to_string(),
        };
        match self.request(peer, pkg)? {
            Package::BestHeight(best) => Ok(best),
            other => Err(BlockchainError::Network(format!("unexpected {other:?}"))),
        }
    }

    fn request_peer_exchange(&self, peer: &Peer, requester: &Peer) -> Result<Vec<Peer>> {
        let pkg = Package::PeerExchange {
            requester: requester.clone(),
        };
        match self.request(peer, pkg)? {
            Package::PeerList { peers } => Ok(peers),
            other => Err(BlockchainError::Network(format!("unexpected {other:?}"))),
        }
    }
}

pub fn peer(port: u16) -> Peer {
    Peer::new("127.0.0.1", port)
}

/// Node with an in-memory chain and a throwaway ledger, registered on `transport`
pub fn spawn_node(
    transport: &Arc<LoopbackTransport>,
    port: u16,
    chain: Blockchain,
) -> Arc<PeerNetwork> {
    spawn_node_with_version(transport, port, chain, relay_chain::NODE_VERSION)
}

pub fn spawn_node_with_version(
    transport: &Arc<LoopbackTransport>,
    port: u16,
    chain: Blockchain,
    version: &str,
) -> Arc<PeerNetwork> {
    let ledger = SledLedger::temporary().unwrap();
    relay_chain::reindex(&ledger, &chain.get_blocks()).unwrap();
    let network = Arc::new(
        PeerNetwork::new(
            peer(port),
            chain,
            Arc::new(TransactionPool::new()),
            Arc::new(Peers::new()),
            transport.clone(),
        )
        .with_ledger(Arc::new(ledger))
        .with_version(version),
    );
    transport.register(&network);
    network
}

/// Both nodes learn each other
pub fn connect(a: &PeerNetwork, b: &PeerNetwork) {
    a.get_peers().add_peer(b.get_self_peer().clone());
    b.get_peers().add_peer(a.get_self_peer().clone());
}

/// Mines a block holding only a reward for `miner` on top of `chain`
pub fn mine_reward_block(chain: &Blockchain, miner: &Wallet) -> Block {
    let height = chain.get_height() + 1;
    let reward =
        Transaction::new_reward(&miner.get_address(), height, Amount::ZERO, None).unwrap();
    let block = Block::mine_block(&chain.get_last_block(), vec![reward], &|| false).unwrap();
    chain.add_block(block.clone(), true).unwrap();
    block
}

/// Chain of genesis plus `blocks` reward-only blocks, all paid to `miner`
pub fn chain_mined_by(miner: &Wallet, blocks: usize) -> Blockchain {
    let chain = Blockchain::new();
    for _ in 0..blocks {
        mine_reward_block(&chain, miner);
    }
    chain
}
