//! Test fixtures shared by the unit tests
//!
//! Cheap blocks, funded wallets and an in-memory transport that records
//! what a node would have sent to its peers.

pub mod test_utils;

pub use test_utils::*;
