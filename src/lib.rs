//! # Relay Chain
//!
//! A small proof-of-work cryptocurrency node. Account balances live in an
//! address-keyed output map on each transaction, blocks carry an explicit
//! height and a chained hash of all hashes, and nodes gossip transactions and
//! blocks as JSON envelopes.
//!
//! ## Layout
//! - `core/`: amounts, transactions, blocks, proof-of-work, difficulty and the chain
//! - `storage/`: the pending-transaction pool, the balance ledger and JSON-lines logs
//! - `network/`: peers, wire messages, the transport seam, the peer network and the TCP server
//! - `wallet/`: P-256 key pairs, base58check addresses and the keystore
//! - `config/`: node settings with TOML and environment overrides
//! - `utils/`: hashing, signing and serialization helpers
//! - `cli/`: argument types for the binary
//!
//! ## Where to start
//! 1. `core/blockchain.rs` for validation, fork choice and balances
//! 2. `core/transaction.rs` for how transfers are built and checked
//! 3. `network/peer_network.rs` for gossip, catch-up sync and mining

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    block_subsidy, Amount, Block, Blockchain, DifficultyAdjustment, ProofOfWork, Transaction,
    TransactionInput, MAX_BLOCK_WEIGHT,
};
pub use error::{BlockchainError, Result};
pub use network::{
    Package, Peer, PeerNetwork, Peers, Server, SyncOutcome, TcpTransport, Transport, NODE_VERSION,
};
pub use storage::{
    apply_block, balance_of, reindex, Admission, BalanceLedger, BalanceRecord, RecordLog,
    SledLedger, TransactionPool,
};
pub use utils::{
    base58_decode, base58_encode, crypto_hash, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_from_public_key, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
