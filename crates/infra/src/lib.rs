//! Infrastructure layer: ledger storage, per-item locking, configuration and
//! the ingestion flow that ties them to the replay engine.

pub mod config;
pub mod service;
pub mod store;

mod integration_tests;

pub use config::LedgerConfig;
pub use service::{CostingPolicy, LedgerError, RebuildReport, ReplaySummary, StockLedger};
pub use store::{
    InMemoryLedgerStore, ItemLedgerTx, LedgerStore, LedgerStoreError, PostgresLedgerStore,
};
