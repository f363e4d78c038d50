use crate::error::Result;
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

/// Keystore of the wallets owned by this node, kept in the node data directory
pub struct Wallets {
    path: PathBuf,
    wallets: HashMap<String, Wallet>,
}

impl Wallets {
    pub fn new(data_dir: &Path) -> Wallets {
        let mut wallets = Wallets {
            path: data_dir.join(WALLET_FILE),
            wallets: HashMap::new(),
        };
        wallets.load_from_file();
        wallets
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn load_from_file(&mut self) {
        // Start with an empty keystore if the file is missing or unreadable
        if let Err(e) = self.load_from_file_safe() {
            log::warn!("Could not load wallets from {}: {e}", self.path.display());
        }
    }

    fn load_from_file_safe(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let mut file = File::open(&self.path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        self.wallets = deserialize(&buf[..])?;
        Ok(())
    }

    fn save_to_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_wallets_persist_across_reloads() {
        let dir = TempDir::new().unwrap();
        let mut wallets = Wallets::new(dir.path());
        let address = wallets.create_wallet().unwrap();

        let reloaded = Wallets::new(dir.path());
        assert_eq!(reloaded.get_addresses(), vec![address.clone()]);
        let wallet = reloaded.get_wallet(&address).unwrap();
        assert_eq!(wallet.get_address(), address);
    }

    #[test]
    fn test_missing_keystore_is_empty() {
        let dir = TempDir::new().unwrap();
        let wallets = Wallets::new(&dir.path().join("nested"));
        assert!(wallets.get_addresses().is_empty());
        assert!(wallets.get_wallet("unknown").is_none());
    }
}
