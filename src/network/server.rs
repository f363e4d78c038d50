use crate::error::{BlockchainError, Result};
use crate::network::message::Package;
use crate::network::PeerNetwork;
use log::{debug, error, info, warn};
use serde_json::Deserializer;
use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Time an inbound connection may stay silent before it is dropped
const TCP_READ_TIMEOUT: u64 = 60;
/// Pause between mining attempts while the pool is empty
const MINER_IDLE: u64 = 1000;
pub const DEFAULT_SYNC_INTERVAL: u64 = 60;

/// TCP front of a node: one thread per inbound connection, plus a background sync
/// loop and, on mining nodes, a miner thread
pub struct Server {
    network: Arc<PeerNetwork>,
    listener: TcpListener,
    sync_interval: Duration,
    miner: Option<String>,
}

impl Server {
    pub fn bind(network: Arc<PeerNetwork>, addr: &str) -> Result<Server> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        Ok(Server {
            network,
            listener,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL),
            miner: None,
        })
    }

    pub fn with_sync_interval(mut self, sync_interval: Duration) -> Server {
        self.sync_interval = sync_interval;
        self
    }

    /// Mine pending transactions, crediting rewards to `address`
    pub fn with_miner(mut self, address: impl Into<String>) -> Server {
        self.miner = Some(address.into());
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until the listener fails
    pub fn run(&self) -> Result<()> {
        info!("Server listening on {}", self.local_addr()?);

        self.start_sync_loop();
        if let Some(address) = &self.miner {
            self.start_miner(address.clone());
        }

        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let peer_addr = match stream.peer_addr() {
                        Ok(addr) => addr,
                        Err(e) => {
                            error!("Failed to get peer address: {e}");
                            continue;
                        }
                    };
                    let network = Arc::clone(&self.network);
                    thread::spawn(move || {
                        if let Err(e) = Self::handle_connection(&network, stream, peer_addr) {
                            warn!("Error handling connection from {peer_addr}: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }
        Ok(())
    }

    fn start_sync_loop(&self) {
        let network = Arc::clone(&self.network);
        let interval = self.sync_interval;
        thread::spawn(move || loop {
            let learned = network.exchange_peers();
            if learned > 0 {
                info!("Peer exchange found {learned} new peers");
            }
            match network.sync() {
                Ok(outcome) => debug!("Sync finished: {outcome:?}"),
                Err(e) => warn!("Sync failed, retrying in {}s: {e}", interval.as_secs()),
            }
            thread::sleep(interval);
        });
    }

    fn start_miner(&self, address: String) {
        let network = Arc::clone(&self.network);
        info!("Mining enabled, rewards go to {address}");
        thread::spawn(move || loop {
            match network.mine_pending(&address) {
                Ok(Some(_)) => {}
                Ok(None) => thread::sleep(Duration::from_millis(MINER_IDLE)),
                Err(e) => {
                    error!("Mining failed: {e}");
                    thread::sleep(Duration::from_millis(MINER_IDLE));
                }
            }
        });
    }

    fn handle_connection(
        network: &PeerNetwork,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        stream
            .set_read_timeout(Some(Duration::from_secs(TCP_READ_TIMEOUT)))
            .map_err(|e| BlockchainError::Network(format!("Failed to set read timeout: {e}")))?;

        let reader = BufReader::new(&stream);
        let pkg_reader = Deserializer::from_reader(reader).into_iter::<Package>();

        for pkg in pkg_reader {
            let pkg = pkg.map_err(|e| {
                BlockchainError::Network(format!("Failed to deserialize package: {e}"))
            })?;
            debug!("Received request from {peer_addr}: {pkg:?}");

            if let Some(response) = network.dispatch(pkg) {
                let mut writer = &stream;
                serde_json::to_writer(writer, &response).map_err(|e| {
                    BlockchainError::Network(format!("Failed to answer {peer_addr}: {e}"))
                })?;
                writer.flush()?;
            }
        }

        let _ = stream.shutdown(Shutdown::Both);
        Ok(())
    }
}
