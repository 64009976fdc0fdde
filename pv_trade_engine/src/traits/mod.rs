//! Backend interface contracts of the trade engine.
//!
//! The [`TradingEngineDatabase`] trait defines the highest level of behaviour a storage backend
//! must expose to power the order flow: queue claim semantics, atomic settlement, curve
//! administration and queries. The [`LedgerManagement`] trait covers the balance store shared
//! with the external payment subsystem. Backends implement both; the SQLite backend in
//! [`crate::SqliteDatabase`] is the reference implementation.
mod data_objects;
mod ledger_management;
mod trading_engine_database;

pub use data_objects::{BatchSummary, ProcessOutcome, SettledTrade};
pub use ledger_management::{LedgerApiError, LedgerManagement};
pub use trading_engine_database::{TradeEngineError, TradingEngineDatabase};
