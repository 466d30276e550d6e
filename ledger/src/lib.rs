//! SimpleBank Ledger
//!
//! Double-entry ledger: a transactional store of accounts, entries and
//! transfers, and the transfer engine that moves money between accounts
//! without deadlocking under concurrent, opposite-direction traffic.

pub mod account;
pub mod balance;
pub mod config;
pub mod engine;
pub mod entry;
pub mod store;
pub mod transfer;

pub use account::{Account, CreateAccountParams};
pub use balance::{lock_order, AddAccountBalanceParams};
pub use config::{LedgerConfig, LogFormat, StoreConfig};
pub use engine::TransferEngine;
pub use entry::{CreateEntryParams, Entry, EntryType};
pub use store::{
    run_in_transaction, Ledger, LedgerStore, MemoryStore, MemoryTransaction, PgStore,
    PgTransaction, Queries, Transaction,
};
pub use transfer::{CreateTransferParams, Transfer, TransferRequest, TransferResult};
