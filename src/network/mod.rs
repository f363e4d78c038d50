//! Peer-to-peer networking
//!
//! Known peers, the JSON wire envelope, the transport seam, the node-side
//! protocol engine (gossip, request handlers, catch-up sync, mining) and the
//! TCP server that drives it.

pub mod message;
pub mod node;
pub mod peer_network;
pub mod server;
pub mod transport;

pub use message::{BestHeight, BlockInfo, BlockMessage, Package, TransactionMessage, NODE_VERSION};
pub use node::{Peer, Peers};
pub use peer_network::{PeerNetwork, SyncOutcome, REWARD_WEIGHT_RESERVE};
pub use server::Server;
pub use transport::{TcpTransport, Transport, TCP_TIMEOUT};
