use crate::error::{BlockchainError, Result};
use crate::storage::RecordLog;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::RwLock;

/// A known-valid endpoint, no identity beyond host and port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    host: String,
    port: u16,
}

impl Peer {
    pub fn new(host: impl Into<String>, port: u16) -> Peer {
        Peer {
            host: host.into(),
            port,
        }
    }

    pub fn get_host(&self) -> &str {
        self.host.as_str()
    }

    /// Resolves the peer to a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| BlockchainError::Network(format!("Failed to resolve {self}: {e}")))?
            .next()
            .ok_or_else(|| BlockchainError::Network(format!("No address found for {self}")))
    }

    /// True when both peers reach the same socket, e.g. `localhost:2001` and `127.0.0.1:2001`
    pub fn same_endpoint(&self, other: &Peer) -> bool {
        if self == other {
            return true;
        }
        if self.port != other.port {
            return false;
        }
        let resolve = |peer: &Peer| -> Vec<SocketAddr> {
            (peer.host.as_str(), peer.port)
                .to_socket_addrs()
                .map(Iterator::collect)
                .unwrap_or_default()
        };
        let ours = resolve(self);
        resolve(other).iter().any(|addr| ours.contains(addr))
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Peer {
    type Err = BlockchainError;

    fn from_str(s: &str) -> Result<Peer> {
        let invalid = || BlockchainError::Network(format!("Invalid peer address '{s}'"));
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Peer::new(host, port))
    }
}

/// Known-peers set: bootstrap-seeded, grown from gossip, persisted one peer per line
pub struct Peers {
    inner: RwLock<Vec<Peer>>,
    log: Option<RecordLog>,
}

impl Default for Peers {
    fn default() -> Self {
        Self::new()
    }
}

impl Peers {
    pub fn new() -> Peers {
        Peers {
            inner: RwLock::new(vec![]),
            log: None,
        }
    }

    /// Peers persisted in `log`; later additions are appended to it
    pub fn load(log: RecordLog) -> Result<Peers> {
        let mut known: Vec<Peer> = vec![];
        for peer in log.read_all::<Peer>()? {
            if !known.contains(&peer) {
                known.push(peer);
            }
        }
        log::info!("Loaded {} known peers", known.len());
        Ok(Peers {
            inner: RwLock::new(known),
            log: Some(log),
        })
    }

    /// Returns true when the peer was not known yet
    pub fn add_peer(&self, peer: Peer) -> bool {
        !self.merge(&[peer], None).is_empty()
    }

    /// Adds every unknown peer except `self_peer` and returns the ones that were new
    pub fn merge(&self, incoming: &[Peer], self_peer: Option<&Peer>) -> Vec<Peer> {
        // Resolved outside the lock
        let incoming: Vec<&Peer> = incoming
            .iter()
            .filter(|peer| self_peer.map_or(true, |me| !me.same_endpoint(peer)))
            .collect();
        let added: Vec<Peer> = match self.inner.write() {
            Ok(mut inner) => {
                let mut added = vec![];
                for peer in incoming {
                    if inner.contains(peer) {
                        continue;
                    }
                    inner.push(peer.clone());
                    added.push(peer.clone());
                }
                added
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on peers");
                return vec![];
            }
        };

        if !added.is_empty() {
            log::info!("Learned {} new peers", added.len());
            if let Some(log) = &self.log {
                if let Err(e) = log.append_all(&added) {
                    log::error!("Could not persist peers: {e}");
                }
            }
        }
        added
    }

    pub fn get_peers(&self) -> Vec<Peer> {
        match self.inner.read() {
            Ok(inner) => inner.to_vec(),
            Err(_) => {
                log::error!("Failed to acquire read lock on peers");
                vec![]
            }
        }
    }

    pub fn contains(&self, peer: &Peer) -> bool {
        match self.inner.read() {
            Ok(inner) => inner.contains(peer),
            Err(_) => {
                log::error!("Failed to acquire read lock on peers");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on peers");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
