use pvx_common::{MicroPv, MicroUsdp};
use thiserror::Error;

use crate::db_types::Ticker;

#[derive(Debug, Clone, Error)]
pub enum LedgerApiError {
    #[error("Ledger store error: {0}")]
    DatabaseError(String),
    #[error("Insufficient funds: balance is {balance}, tried to debit {debit}")]
    InsufficientFunds { balance: MicroUsdp, debit: MicroUsdp },
    #[error("Insufficient holdings of {ticker}: balance is {balance}, tried to debit {debit}")]
    InsufficientShares { ticker: Ticker, balance: MicroPv, debit: MicroPv },
    #[error("Amount must be positive: {0}")]
    NonPositiveAmount(String),
}

impl From<sqlx::Error> for LedgerApiError {
    fn from(e: sqlx::Error) -> Self {
        LedgerApiError::DatabaseError(e.to_string())
    }
}

/// The `LedgerManagement` trait defines behaviour for the durable balance store.
///
/// Every mutation is an atomic increment: the read-check-write happens as one indivisible store
/// operation, so concurrent callers (the order processor and the external payment subsystem)
/// can never produce a lost update or drive a balance negative.
#[allow(async_fn_in_trait)]
pub trait LedgerManagement {
    /// Adjusts the user's currency balance by `delta` (negative is a debit) and returns the new
    /// balance. A debit that would take the balance below zero fails with
    /// [`LedgerApiError::InsufficientFunds`] and has no effect. A credit creates the ledger row
    /// if the user has none yet.
    async fn adjust_currency_balance(&self, user_id: &str, delta: MicroUsdp) -> Result<MicroUsdp, LedgerApiError>;

    /// The user's current currency balance. Unknown users have a balance of zero.
    async fn currency_balance(&self, user_id: &str) -> Result<MicroUsdp, LedgerApiError>;

    /// Adjusts the user's holding of `ticker` by `delta`, with the same atomicity and
    /// non-negativity contract as [`adjust_currency_balance`](Self::adjust_currency_balance).
    /// The holding row is created with a zero basis when absent.
    async fn adjust_share_balance(
        &self,
        user_id: &str,
        ticker: &Ticker,
        delta: MicroPv,
    ) -> Result<MicroPv, LedgerApiError>;

    /// The user's current holding of `ticker`. Unknown pairs have a holding of zero.
    async fn share_balance(&self, user_id: &str, ticker: &Ticker) -> Result<MicroPv, LedgerApiError>;
}
