use crate::error::{BlockchainError, Result};
use crate::utils::{base58_decode, base58_encode, hex_encode, ripemd160_digest, sha256_digest};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::{Deserialize, Serialize};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

/// A P-256 key pair and the address derived from it
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = crate::utils::new_key_pair()?;
        let rng = SystemRandom::new();
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .map_err(|e| {
                    BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
                })?;
        let public_key = key_pair.public_key().as_ref().to_vec();
        Ok(Wallet { pkcs8, public_key })
    }

    pub fn get_address(&self) -> String {
        address_from_public_key(self.public_key.as_slice())
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    /// Uncompressed public key, hex encoded as it travels in transaction inputs
    pub fn get_public_key_hex(&self) -> String {
        hex_encode(self.public_key.as_slice())
    }

    /// Signs `message` and returns the hex-encoded fixed-size signature
    pub fn sign(&self, message: &[u8]) -> Result<String> {
        let signature = crate::utils::ecdsa_p256_sha256_sign_digest(&self.pkcs8, message)?;
        Ok(hex_encode(signature.as_slice()))
    }
}

pub fn address_from_public_key(public_key: &[u8]) -> String {
    convert_address(hash_pub_key(public_key).as_slice())
}

pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = sha256_digest(pub_key);
    ripemd160_digest(pub_key_sha256.as_slice())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = sha256_digest(payload);
    let second_sha = sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

pub fn validate_address(address: &str) -> bool {
    let payload = match base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };

    // version + at least one byte of hash + checksum
    if payload.len() < ADDRESS_CHECK_SUM_LEN + 2 || payload[0] != VERSION {
        return false;
    }

    let (body, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    checksum(body).as_slice() == actual_checksum
}

pub fn convert_address(pub_hash_key: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![VERSION];
    payload.extend(pub_hash_key);
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum.as_slice());
    // version + pub_key_hash + checksum
    base58_encode(payload.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{ecdsa_p256_sha256_sign_verify, hex_decode};

    #[test]
    fn test_wallet_address_is_valid() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();
        assert!(validate_address(&address));
        assert_eq!(address, address_from_public_key(wallet.get_public_key()));
    }

    #[test]
    fn test_validate_address_rejects_tampering() {
        let address = Wallet::new().unwrap().get_address();
        let mut chars: Vec<char> = address.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let tampered: String = chars.into_iter().collect();

        assert!(!validate_address(&tampered));
        assert!(!validate_address(""));
        assert!(!validate_address("not-base58-0OIl"));
        assert!(!validate_address("*None*"));
    }

    #[test]
    fn test_sign_produces_verifiable_hex_signature() {
        let wallet = Wallet::new().unwrap();
        let signature = wallet.sign(b"outputs").unwrap();
        let signature = hex_decode(&signature).unwrap();
        let public_key = hex_decode(&wallet.get_public_key_hex()).unwrap();
        assert!(ecdsa_p256_sha256_sign_verify(&public_key, &signature, b"outputs"));
    }

    #[test]
    fn test_distinct_wallets_have_distinct_addresses() {
        let a = Wallet::new().unwrap();
        let b = Wallet::new().unwrap();
        assert_ne!(a.get_address(), b.get_address());
    }
}
