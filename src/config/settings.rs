use crate::core::MAX_BLOCK_WEIGHT;
use crate::error::{BlockchainError, Result};
use crate::network::Peer;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

static DEFAULT_NODE_ADDR: &str = "127.0.0.1:2001";
static DEFAULT_DATA_DIR: &str = "data";

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";
const DATA_DIR_KEY: &str = "DATA_DIR";
const BOOTSTRAP_PEERS_KEY: &str = "BOOTSTRAP_PEERS";

const CHAIN_LOG: &str = "chain.log";
const PEERS_LOG: &str = "peers.log";
const LEDGER_DIR: &str = "ledger";

/// Node settings: defaults, then an optional TOML file, then environment overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    node_address: String,
    mining_address: Option<String>,
    data_dir: PathBuf,
    bootstrap_peers: Vec<String>,
    request_timeout_ms: u64,
    sync_interval_secs: u64,
    max_block_weight: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_address: String::from(DEFAULT_NODE_ADDR),
            mining_address: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            bootstrap_peers: vec![],
            request_timeout_ms: 5000,
            sync_interval_secs: 60,
            max_block_weight: MAX_BLOCK_WEIGHT,
        }
    }
}

impl Config {
    /// Defaults overridden by the process environment
    pub fn new() -> Config {
        let mut config = Config::default();
        config.apply_env(|key| env::var(key).ok());
        config
    }

    /// Settings from `path` (when given), then the environment on top
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let raw = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&raw)?)
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(NODE_ADDRESS_KEY) {
            self.node_address = addr;
        }
        if let Some(addr) = lookup(MINING_ADDRESS_KEY) {
            self.mining_address = Some(addr);
        }
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(peers) = lookup(BOOTSTRAP_PEERS_KEY) {
            self.bootstrap_peers = peers
                .split(',')
                .map(str::trim)
                .filter(|peer| !peer.is_empty())
                .map(String::from)
                .collect();
        }
    }

    pub fn get_node_addr(&self) -> String {
        self.node_address.clone()
    }

    pub fn get_mining_addr(&self) -> Option<String> {
        self.mining_address.clone()
    }

    pub fn set_mining_addr(&mut self, addr: String) {
        self.mining_address = Some(addr);
    }

    pub fn is_miner(&self) -> bool {
        self.mining_address.is_some()
    }

    pub fn get_request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn get_sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn get_max_block_weight(&self) -> u64 {
        self.max_block_weight
    }

    pub fn get_self_peer(&self) -> Result<Peer> {
        self.node_address.parse()
    }

    /// Bootstrap peers; entries that do not parse are reported
    pub fn get_bootstrap_peers(&self) -> Result<Vec<Peer>> {
        self.bootstrap_peers
            .iter()
            .map(|peer| {
                peer.parse::<Peer>()
                    .map_err(|e| BlockchainError::Config(format!("Bootstrap peer: {e}")))
            })
            .collect()
    }

    /// Extract node ID from address (e.g., "127.0.0.1:2001" -> "2001")
    pub fn extract_node_id_from_addr(&self) -> String {
        if let Some(port) = self.node_address.split(':').next_back() {
            port.to_string()
        } else {
            "default".to_string()
        }
    }

    /// `<data_dir>/node_<port>/`, where chain, peers, ledger and wallets live
    pub fn node_data_dir(&self) -> PathBuf {
        self.data_dir
            .join(format!("node_{}", self.extract_node_id_from_addr()))
    }

    pub fn chain_log_path(&self) -> PathBuf {
        self.node_data_dir().join(CHAIN_LOG)
    }

    pub fn peers_log_path(&self) -> PathBuf {
        self.node_data_dir().join(PEERS_LOG)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.node_data_dir().join(LEDGER_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::test_utils::create_temp_dir;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.get_node_addr(), "127.0.0.1:2001");
        assert!(!config.is_miner());
        assert_eq!(config.get_request_timeout(), Duration::from_millis(5000));
        assert_eq!(config.get_sync_interval(), Duration::from_secs(60));
        assert_eq!(config.get_max_block_weight(), MAX_BLOCK_WEIGHT);
        assert_eq!(config.extract_node_id_from_addr(), "2001");
        assert_eq!(
            config.chain_log_path(),
            PathBuf::from("data/node_2001/chain.log")
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (NODE_ADDRESS_KEY, "127.0.0.1:3005"),
            (MINING_ADDRESS_KEY, "1Miner"),
            (BOOTSTRAP_PEERS_KEY, "127.0.0.1:2001, 127.0.0.1:2002,"),
        ]);
        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.get_self_peer().unwrap(), Peer::new("127.0.0.1", 3005));
        assert_eq!(config.get_mining_addr(), Some("1Miner".to_string()));
        assert_eq!(
            config.get_bootstrap_peers().unwrap(),
            vec![Peer::new("127.0.0.1", 2001), Peer::new("127.0.0.1", 2002)]
        );
        assert_eq!(config.node_data_dir(), PathBuf::from("data/node_3005"));
    }

    #[test]
    fn test_from_file() {
        let dir = create_temp_dir().unwrap();
        let path = dir.path().join("node.toml");
        fs::write(
            &path,
            "node_address = \"0.0.0.0:4000\"\nsync_interval_secs = 5\nbootstrap_peers = [\"10.0.0.1:4000\"]\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.get_node_addr(), "0.0.0.0:4000");
        assert_eq!(config.get_sync_interval(), Duration::from_secs(5));
        assert_eq!(config.get_request_timeout(), Duration::from_millis(5000));
        assert_eq!(config.get_bootstrap_peers().unwrap().len(), 1);
    }

    #[test]
    fn test_bad_file_and_peers() {
        let dir = create_temp_dir().unwrap();
        let path = dir.path().join("node.toml");
        fs::write(&path, "sync_interval_secs = \"soon\"").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(BlockchainError::Config(_))
        ));
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());

        let mut config = Config::default();
        config.apply_env(|key| (key == BOOTSTRAP_PEERS_KEY).then(|| "nonsense".to_string()));
        assert!(config.get_bootstrap_peers().is_err());
    }
}
