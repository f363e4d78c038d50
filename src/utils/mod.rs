//! Utility functions and helpers
//!
//! Hashing, signing, encoding and serialization helpers shared by the
//! chain, the pool and the network layer.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, crypto_hash, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, hash_encoded_parts, hex_decode, hex_encode, new_key_pair,
    ripemd160_digest, sha256_digest,
};

pub use serialization::{deserialize, serialize, serialized_size};
