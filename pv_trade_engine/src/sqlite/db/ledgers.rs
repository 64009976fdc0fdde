//! Balance mutation primitives.
//!
//! Every mutation here is a single SQL statement, so the read-check-write is indivisible at the
//! store level: concurrent callers serialize on the row and a debit can never observe a stale
//! balance. The CHECK constraints on the tables are a second line of defence only; the
//! conditional UPDATEs are what enforce the non-negative invariant.
use log::trace;
use pvx_common::{MicroPv, MicroUsdp};
use sqlx::SqliteConnection;

use crate::{db_types::Ticker, traits::LedgerApiError};

/// Adjusts the user's currency balance by `delta` (negative debits) and returns the new balance.
/// Debits that would take the balance below zero fail with `InsufficientFunds` and change
/// nothing. Credits create the ledger row if the user has none.
pub async fn adjust_currency_balance(
    user_id: &str,
    delta: MicroUsdp,
    conn: &mut SqliteConnection,
) -> Result<MicroUsdp, LedgerApiError> {
    if delta.value() >= 0 {
        let balance: MicroUsdp = sqlx::query_scalar(
            r#"
                INSERT INTO user_ledgers (user_id, balance) VALUES ($1, $2)
                ON CONFLICT (user_id)
                DO UPDATE SET balance = balance + excluded.balance, updated_at = CURRENT_TIMESTAMP
                RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(delta)
        .fetch_one(conn)
        .await?;
        trace!("💰️ Credited {delta} to {user_id}; balance now {balance}");
        Ok(balance)
    } else {
        let balance: Option<MicroUsdp> = sqlx::query_scalar(
            r#"
                UPDATE user_ledgers SET balance = balance + $1, updated_at = CURRENT_TIMESTAMP
                WHERE user_id = $2 AND balance + $1 >= 0
                RETURNING balance
            "#,
        )
        .bind(delta)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        match balance {
            Some(balance) => {
                trace!("💰️ Debited {} from {user_id}; balance now {balance}", -delta);
                Ok(balance)
            },
            None => {
                let balance = currency_balance(user_id, conn).await?;
                Err(LedgerApiError::InsufficientFunds { balance, debit: -delta })
            },
        }
    }
}

/// The user's currency balance. Users without a ledger row have a balance of zero.
pub async fn currency_balance(user_id: &str, conn: &mut SqliteConnection) -> Result<MicroUsdp, LedgerApiError> {
    let balance: Option<MicroUsdp> =
        sqlx::query_scalar("SELECT balance FROM user_ledgers WHERE user_id = $1").bind(user_id).fetch_optional(conn).await?;
    Ok(balance.unwrap_or_default())
}

/// Adjusts the user's holding of `ticker` by `delta`, with the same contract as
/// [`adjust_currency_balance`]. The holding row is created with a zero basis when absent.
pub async fn adjust_share_balance(
    user_id: &str,
    ticker: &Ticker,
    delta: MicroPv,
    conn: &mut SqliteConnection,
) -> Result<MicroPv, LedgerApiError> {
    if delta.value() >= 0 {
        let quantity: MicroPv = sqlx::query_scalar(
            r#"
                INSERT INTO share_ledgers (user_id, ticker, quantity) VALUES ($1, $2, $3)
                ON CONFLICT (user_id, ticker)
                DO UPDATE SET quantity = quantity + excluded.quantity, updated_at = CURRENT_TIMESTAMP
                RETURNING quantity
            "#,
        )
        .bind(user_id)
        .bind(ticker.as_str())
        .bind(delta)
        .fetch_one(conn)
        .await?;
        trace!("💰️ Credited {delta} of {ticker} to {user_id}; holding now {quantity}");
        Ok(quantity)
    } else {
        let quantity: Option<MicroPv> = sqlx::query_scalar(
            r#"
                UPDATE share_ledgers SET quantity = quantity + $1, updated_at = CURRENT_TIMESTAMP
                WHERE user_id = $2 AND ticker = $3 AND quantity + $1 >= 0
                RETURNING quantity
            "#,
        )
        .bind(delta)
        .bind(user_id)
        .bind(ticker.as_str())
        .fetch_optional(&mut *conn)
        .await?;
        match quantity {
            Some(quantity) => {
                trace!("💰️ Debited {} of {ticker} from {user_id}; holding now {quantity}", -delta);
                Ok(quantity)
            },
            None => {
                let balance = share_balance(user_id, ticker, conn).await?;
                Err(LedgerApiError::InsufficientShares { ticker: ticker.clone(), balance, debit: -delta })
            },
        }
    }
}

/// The user's holding of `ticker`. Pairs without a ledger row have a holding of zero.
pub async fn share_balance(
    user_id: &str,
    ticker: &Ticker,
    conn: &mut SqliteConnection,
) -> Result<MicroPv, LedgerApiError> {
    let quantity: Option<MicroPv> =
        sqlx::query_scalar("SELECT quantity FROM share_ledgers WHERE user_id = $1 AND ticker = $2")
            .bind(user_id)
            .bind(ticker.as_str())
            .fetch_optional(conn)
            .await?;
    Ok(quantity.unwrap_or_default())
}
