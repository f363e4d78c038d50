//! Data storage and persistence
//!
//! The pool of unconfirmed transactions, the balance ledger and the
//! JSON-lines record log used for chain history and the peer list.

pub mod ledger;
pub mod memory_pool;
pub mod record_log;

pub use ledger::{apply_block, balance_of, reindex, BalanceLedger, BalanceRecord, SledLedger};
pub use memory_pool::{Admission, TransactionPool};
pub use record_log::RecordLog;
