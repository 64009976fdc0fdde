use sqlx::SqliteConnection;

use crate::{
    db_types::{NewTransaction, OrderId, Ticker, Transaction},
    traits::TradeEngineError,
};

/// Appends a settlement record. Transactions are immutable: there are no update functions in
/// this module, and refunds are inserted as new records.
pub async fn insert_transaction(
    record: NewTransaction,
    conn: &mut SqliteConnection,
) -> Result<Transaction, TradeEngineError> {
    let transaction = sqlx::query_as(
        r#"
            INSERT INTO transactions (
                order_id,
                user_id,
                ticker,
                direction,
                usdp_amount,
                pv_amount,
                avg_price,
                start_price,
                end_price,
                status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *;
        "#,
    )
    .bind(record.order_id)
    .bind(record.user_id)
    .bind(record.ticker)
    .bind(record.direction.to_string())
    .bind(record.usdp_amount)
    .bind(record.pv_amount)
    .bind(record.avg_price)
    .bind(record.start_price)
    .bind(record.end_price)
    .bind(record.status.to_string())
    .fetch_one(conn)
    .await?;
    Ok(transaction)
}

pub async fn fetch_transaction(id: i64, conn: &mut SqliteConnection) -> Result<Option<Transaction>, sqlx::Error> {
    let transaction =
        sqlx::query_as("SELECT * FROM transactions WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(transaction)
}

pub async fn fetch_transactions_for_user(
    user_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let transactions = sqlx::query_as("SELECT * FROM transactions WHERE user_id = $1 ORDER BY created_at ASC, id ASC")
        .bind(user_id)
        .fetch_all(conn)
        .await?;
    Ok(transactions)
}

pub async fn fetch_transactions_for_order(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let transactions = sqlx::query_as("SELECT * FROM transactions WHERE order_id = $1 ORDER BY created_at ASC, id ASC")
        .bind(order_id.as_str())
        .fetch_all(conn)
        .await?;
    Ok(transactions)
}

/// All settlement records against one issuer, oldest first. This is the issuer's trade history
/// and the input to `total_usdp` reconciliation checks.
pub async fn fetch_transactions_for_ticker(
    ticker: &Ticker,
    conn: &mut SqliteConnection,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let transactions = sqlx::query_as("SELECT * FROM transactions WHERE ticker = $1 ORDER BY created_at ASC, id ASC")
        .bind(ticker.as_str())
        .fetch_all(conn)
        .await?;
    Ok(transactions)
}
