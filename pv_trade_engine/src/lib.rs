//! PV Trade Engine
//!
//! The PV Trade Engine is the settlement core of the PV marketplace: a serialized order-queue
//! processor that matches buy/sell orders against a per-issuer bonding curve, mutates user
//! ledgers, and records an immutable transaction per settled order. It is trigger-agnostic: HTTP
//! handlers, cron ticks and database-event webhooks all call the same [`TradeFlowApi`] entry
//! points, and safety under concurrent invocation comes from atomic store operations rather than
//! in-process locks.
//!
//! The library is divided into three main sections:
//! 1. Database management and control ([`mod@sqlite`]). SQLite is the supported backend. You
//!    should never need to access the database directly; use the public API instead. The
//!    exception is the data types used in the database, defined in the public `db_types` module.
//! 2. The pure pricing model ([`mod@curve`]): the linear bonding-curve math that turns a curve
//!    snapshot and a trade request into an execution quote, with no side effects.
//! 3. The public API ([`TradeFlowApi`], [`LedgerApi`]). Backends implement the traits in
//!    [`mod@traits`] to power these APIs.
//!
//! The engine also emits events when orders settle or fail. A simple actor framework lets you
//! hook into these events and perform custom actions; see [`mod@events`].
mod api;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub mod curve;
pub mod db_types;
pub mod events;
#[cfg(feature = "sqlite")]
pub mod test_utils;

pub use api::{LedgerApi, OrderQueryFilter, TradeFlowApi, DEFAULT_MAX_BATCH};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    BatchSummary,
    LedgerApiError,
    LedgerManagement,
    ProcessOutcome,
    SettledTrade,
    TradeEngineError,
    TradingEngineDatabase,
};
