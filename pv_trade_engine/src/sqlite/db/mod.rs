//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interactions are maintained by simple functions (rather than stateful structs) that
//! accept a `&mut SqliteConnection` argument. Callers can obtain a connection from a pool, or
//! create an atomic transaction as the need arises and call through to the functions without any
//! other changes. The settlement transaction in
//! [`SqliteDatabase`](crate::SqliteDatabase) is composed exactly this way.
use std::{env, str::FromStr, time::Duration};

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

pub mod curves;
pub mod ledgers;
pub mod orders;
pub mod transactions;

const SQLITE_DB_URL: &str = "sqlite://data/pv_store.db";

pub fn db_url() -> String {
    let result = env::var("PVX_DATABASE_URL").unwrap_or_else(|_| {
        info!("PVX_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("Using database URL: {result}");
    result
}

/// Connects a pool with WAL journaling and a busy timeout, so concurrent trigger invocations
/// queue on the database rather than erroring out.
pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}
