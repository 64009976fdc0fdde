//! Unified API over the balance store, shared with the external payment subsystem.

use std::fmt::Debug;

use log::debug;
use pvx_common::{MicroPv, MicroUsdp};

use crate::{
    db_types::Ticker,
    traits::{LedgerApiError, LedgerManagement},
};

/// The `LedgerApi` exposes the currency ledger to the deposit/withdrawal flow and read-only
/// balance queries to everyone else. Trade settlement does not go through here; the order
/// processor mutates balances inside its own settlement transaction.
pub struct LedgerApi<B> {
    db: B,
}

impl<B: Debug> Debug for LedgerApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LedgerApi ({:?})", self.db)
    }
}

impl<B> LedgerApi<B>
where B: LedgerManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Credits the user's currency balance. Used by external deposit settlement.
    pub async fn credit_currency(&self, user_id: &str, amount: MicroUsdp) -> Result<MicroUsdp, LedgerApiError> {
        if !amount.is_positive() {
            return Err(LedgerApiError::NonPositiveAmount(format!("credit of {amount}")));
        }
        let new_balance = self.db.adjust_currency_balance(user_id, amount).await?;
        debug!("💰️ Credited {amount} to {user_id}. New balance: {new_balance}");
        Ok(new_balance)
    }

    /// Debits the user's currency balance, failing with
    /// [`LedgerApiError::InsufficientFunds`] rather than going negative. Used by external
    /// withdrawal initiation.
    pub async fn debit_currency(&self, user_id: &str, amount: MicroUsdp) -> Result<MicroUsdp, LedgerApiError> {
        if !amount.is_positive() {
            return Err(LedgerApiError::NonPositiveAmount(format!("debit of {amount}")));
        }
        let new_balance = self.db.adjust_currency_balance(user_id, -amount).await?;
        debug!("💰️ Debited {amount} from {user_id}. New balance: {new_balance}");
        Ok(new_balance)
    }

    pub async fn currency_balance(&self, user_id: &str) -> Result<MicroUsdp, LedgerApiError> {
        self.db.currency_balance(user_id).await
    }

    pub async fn share_balance(&self, user_id: &str, ticker: &Ticker) -> Result<MicroPv, LedgerApiError> {
        self.db.share_balance(user_id, ticker).await
    }
}
