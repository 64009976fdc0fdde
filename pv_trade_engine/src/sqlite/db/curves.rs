use log::trace;
use pvx_common::{MicroPv, MicroUsdp};
use sqlx::SqliteConnection;

use crate::{
    db_types::{IssuerCurve, NewIssuerCurve, Ticker},
    traits::TradeEngineError,
};

/// Lists a new issuer. The cached price starts at the base price, supply and holdings at zero.
pub async fn insert_curve(curve: NewIssuerCurve, conn: &mut SqliteConnection) -> Result<IssuerCurve, TradeEngineError> {
    let ticker = curve.ticker.clone();
    let result = sqlx::query_as(
        r#"
            INSERT INTO issuer_curves (ticker, base_price, price_step, current_price, current_supply, total_usdp)
            VALUES ($1, $2, $3, $2, 0, 0)
            RETURNING *;
        "#,
    )
    .bind(curve.ticker)
    .bind(curve.base_price)
    .bind(curve.price_step)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => TradeEngineError::TickerAlreadyListed(ticker),
        _ => TradeEngineError::from(e),
    })?;
    Ok(result)
}

pub async fn fetch_curve(ticker: &Ticker, conn: &mut SqliteConnection) -> Result<Option<IssuerCurve>, sqlx::Error> {
    let curve = sqlx::query_as("SELECT * FROM issuer_curves WHERE ticker = $1")
        .bind(ticker.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(curve)
}

pub async fn list_curves(conn: &mut SqliteConnection) -> Result<Vec<IssuerCurve>, sqlx::Error> {
    let curves = sqlx::query_as("SELECT * FROM issuer_curves ORDER BY ticker ASC").fetch_all(conn).await?;
    Ok(curves)
}

/// Compare-and-swap update of the shared curve row.
///
/// The new price/supply/holdings are written only if the row still matches the snapshot the
/// trade was priced against; returns `false` (and changes nothing) when a concurrent trade got
/// there first. The caller decides whether to re-price or give up.
pub async fn checked_update(
    snapshot: &IssuerCurve,
    new_price: MicroUsdp,
    new_supply: MicroPv,
    new_total_usdp: MicroUsdp,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
            UPDATE issuer_curves
            SET current_price = $1, current_supply = $2, total_usdp = $3, updated_at = CURRENT_TIMESTAMP
            WHERE ticker = $4 AND current_price = $5 AND current_supply = $6 AND total_usdp = $7
        "#,
    )
    .bind(new_price)
    .bind(new_supply)
    .bind(new_total_usdp)
    .bind(snapshot.ticker.as_str())
    .bind(snapshot.current_price)
    .bind(snapshot.current_supply)
    .bind(snapshot.total_usdp)
    .execute(conn)
    .await?;
    let swapped = result.rows_affected() == 1;
    if !swapped {
        trace!("📝️ Curve row for {} no longer matches its snapshot", snapshot.ticker);
    }
    Ok(swapped)
}
