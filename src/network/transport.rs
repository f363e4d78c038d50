use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::network::message::{BestHeight, BlockMessage, Package, TransactionMessage};
use crate::network::Peer;
use log::{debug, warn};
use serde_json::Deserializer;
use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::Duration;

/// Connect, read and write timeout for peer connections, in milliseconds
pub const TCP_TIMEOUT: u64 = 5000;

/// How the peer network reaches other nodes. Sends are fire-and-forget and must not
/// block the caller; requests are bounded by the transport's timeout.
pub trait Transport: Send + Sync {
    fn send_transaction(&self, peer: &Peer, message: TransactionMessage);

    fn send_block(&self, peer: &Peer, message: BlockMessage);

    fn request_block(&self, peer: &Peer, height: u64) -> Result<Option<Block>>;

    fn request_best_height(&self, peer: &Peer, version: &str) -> Result<BestHeight>;

    /// Announces `requester` to `peer` and returns the peers it knows
    fn request_peer_exchange(&self, peer: &Peer, requester: &Peer) -> Result<Vec<Peer>>;
}

/// One JSON envelope per connection. Requests half-close the stream after writing
/// and read a single envelope back.
pub struct TcpTransport {
    timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(TCP_TIMEOUT))
    }
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> TcpTransport {
        TcpTransport { timeout }
    }

    fn connect(&self, peer: &Peer) -> Result<TcpStream> {
        let addr = peer.socket_addr()?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| BlockchainError::Network(format!("Failed to connect to {peer}: {e}")))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| BlockchainError::Network(format!("Failed to set write timeout: {e}")))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| BlockchainError::Network(format!("Failed to set read timeout: {e}")))?;
        Ok(stream)
    }

    fn write_package(peer: &Peer, mut stream: &TcpStream, pkg: &Package) -> Result<()> {
        serde_json::to_writer(stream, pkg)
            .map_err(|e| BlockchainError::Network(format!("Failed to send to {peer}: {e}")))?;
        stream
            .flush()
            .map_err(|e| BlockchainError::Network(format!("Failed to send to {peer}: {e}")))?;
        Ok(())
    }

    /// Writes `pkg` and closes the connection
    pub fn send(&self, peer: &Peer, pkg: &Package) -> Result<()> {
        let stream = self.connect(peer)?;
        Self::write_package(peer, &stream, pkg)?;
        let _ = stream.shutdown(Shutdown::Both);
        Ok(())
    }

    /// Writes `pkg`, half-closes and reads exactly one envelope back
    pub fn request(&self, peer: &Peer, pkg: &Package) -> Result<Package> {
        let stream = self.connect(peer)?;
        Self::write_package(peer, &stream, pkg)?;
        stream
            .shutdown(Shutdown::Write)
            .map_err(|e| BlockchainError::Network(format!("Failed to half-close {peer}: {e}")))?;

        let reader = BufReader::new(&stream);
        let response = Deserializer::from_reader(reader)
            .into_iter::<Package>()
            .next()
            .ok_or_else(|| BlockchainError::Network(format!("{peer} closed without a response")))?
            .map_err(|e| {
                BlockchainError::Network(format!("Failed to read response from {peer}: {e}"))
            })?;
        Ok(response)
    }

    fn send_detached(&self, peer: &Peer, pkg: Package) {
        let transport = TcpTransport::new(self.timeout);
        let peer = peer.clone();
        thread::spawn(move || match transport.send(&peer, &pkg) {
            Ok(()) => debug!("Sent package to {peer}"),
            Err(e) => warn!("Could not reach {peer}: {e}"),
        });
    }
}

fn unexpected(peer: &Peer, expected: &str, got: &Package) -> BlockchainError {
    BlockchainError::Network(format!("{peer} answered {got:?} to a {expected} request"))
}

impl Transport for TcpTransport {
    fn send_transaction(&self, peer: &Peer, message: TransactionMessage) {
        self.send_detached(peer, Package::Transaction(message));
    }

    fn send_block(&self, peer: &Peer, message: BlockMessage) {
        self.send_detached(peer, Package::Block(message));
    }

    fn request_block(&self, peer: &Peer, height: u64) -> Result<Option<Block>> {
        match self.request(peer, &Package::GetBlock { height })? {
            Package::BlockData { block } => Ok(block),
            other => Err(unexpected(peer, "GET_BLOCK", &other)),
        }
    }

    fn request_best_height(&self, peer: &Peer, version: &str) -> Result<BestHeight> {
        let pkg = Package::GetBestHeight {
            version: version.to_string(),
        };
        match self.request(peer, &pkg)? {
            Package::BestHeight(best) => Ok(best),
            other => Err(unexpected(peer, "GET_BEST_HEIGHT", &other)),
        }
    }

    fn request_peer_exchange(&self, peer: &Peer, requester: &Peer) -> Result<Vec<Peer>> {
        let pkg = Package::PeerExchange {
            requester: requester.clone(),
        };
        match self.request(peer, &pkg)? {
            Package::PeerList { peers } => Ok(peers),
            other => Err(unexpected(peer, "PEER_EXCHANGE", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::NODE_VERSION;
    use std::net::TcpListener;

    fn answer_once(response: Package) -> Peer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let reader = BufReader::new(&stream);
            let request = Deserializer::from_reader(reader)
                .into_iter::<Package>()
                .next()
                .unwrap()
                .unwrap();
            assert!(matches!(request, Package::GetBestHeight { .. }));
            serde_json::to_writer(&stream, &response).unwrap();
        });
        Peer::new("127.0.0.1", port)
    }

    #[test]
    fn test_request_reads_one_response() {
        let peer = answer_once(Package::BestHeight(BestHeight {
            height: 7,
            version: NODE_VERSION.to_string(),
        }));
        let best = TcpTransport::default()
            .request_best_height(&peer, NODE_VERSION)
            .unwrap();
        assert_eq!(best.height, 7);
    }

    #[test]
    fn test_unexpected_response_is_network_error() {
        let peer = answer_once(Package::PeerList { peers: vec![] });
        let result = TcpTransport::default().request_best_height(&peer, NODE_VERSION);
        assert!(matches!(result, Err(BlockchainError::Network(_))));
    }

    #[test]
    fn test_unreachable_peer_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = TcpTransport::new(Duration::from_millis(500));
        let result = transport.request_block(&Peer::new("127.0.0.1", port), 1);
        assert!(matches!(result, Err(BlockchainError::Network(_))));
    }
}
