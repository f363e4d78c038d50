//! Command-line interface
//!
//! Argument types for the `relay-chain` binary.

pub mod commands;

pub use commands::{Command, Opt};
