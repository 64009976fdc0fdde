//! `SqliteDatabase` is a concrete implementation of a trade engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements the traits defined in the
//! [`crate::traits`] module. Settlement is a single database transaction composed from the
//! low-level functions in [`super::db`].
use std::fmt::Debug;

use log::*;
use pvx_common::{MicroPv, MicroUsdp};
use sqlx::SqlitePool;

use super::db::{curves, db_url, ledgers, new_pool, orders, transactions};
use crate::{
    curve::TradeQuote,
    db_types::{
        IssuerCurve,
        NewIssuerCurve,
        NewOrder,
        NewTransaction,
        Order,
        OrderId,
        OrderStatusType,
        Ticker,
        TradeDirection,
        Transaction,
        TransactionStatus,
    },
    traits::{LedgerApiError, LedgerManagement, SettledTrade, TradeEngineError, TradingEngineDatabase},
    OrderQueryFilter,
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Connects using the URL from the `PVX_DATABASE_URL` environment variable.
    pub async fn new(max_connections: u32) -> Result<Self, TradeEngineError> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, TradeEngineError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl LedgerManagement for SqliteDatabase {
    async fn adjust_currency_balance(&self, user_id: &str, delta: MicroUsdp) -> Result<MicroUsdp, LedgerApiError> {
        let mut conn = self.pool.acquire().await.map_err(LedgerApiError::from)?;
        ledgers::adjust_currency_balance(user_id, delta, &mut conn).await
    }

    async fn currency_balance(&self, user_id: &str) -> Result<MicroUsdp, LedgerApiError> {
        let mut conn = self.pool.acquire().await.map_err(LedgerApiError::from)?;
        ledgers::currency_balance(user_id, &mut conn).await
    }

    async fn adjust_share_balance(
        &self,
        user_id: &str,
        ticker: &Ticker,
        delta: MicroPv,
    ) -> Result<MicroPv, LedgerApiError> {
        let mut conn = self.pool.acquire().await.map_err(LedgerApiError::from)?;
        ledgers::adjust_share_balance(user_id, ticker, delta, &mut conn).await
    }

    async fn share_balance(&self, user_id: &str, ticker: &Ticker) -> Result<MicroPv, LedgerApiError> {
        let mut conn = self.pool.acquire().await.map_err(LedgerApiError::from)?;
        ledgers::share_balance(user_id, ticker, &mut conn).await
    }
}

impl TradingEngineDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn create_issuer_curve(&self, curve: NewIssuerCurve) -> Result<IssuerCurve, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let curve = curves::insert_curve(curve, &mut conn).await?;
        debug!("🗃️ Issuer {} listed at {} (step {})", curve.ticker, curve.base_price, curve.price_step);
        Ok(curve)
    }

    async fn fetch_issuer_curve(&self, ticker: &Ticker) -> Result<Option<IssuerCurve>, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let curve = curves::fetch_curve(ticker, &mut conn).await?;
        Ok(curve)
    }

    async fn list_issuer_curves(&self) -> Result<Vec<IssuerCurve>, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let result = curves::list_curves(&mut conn).await?;
        Ok(result)
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let inserted = orders::idempotent_insert(order, &mut conn).await?;
        Ok(inserted)
    }

    async fn claim_next_order(&self) -> Result<Option<Order>, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::claim_next(&mut conn).await?;
        Ok(order)
    }

    /// The settlement transaction. All of the following happen atomically, or none of them do:
    ///
    /// 1. The curve row is compare-and-swapped against the snapshot the quote was priced from.
    /// 2. The currency ledger is debited (buy) or credited (sell).
    /// 3. The share ledger is credited (buy) or debited (sell).
    /// 4. The transaction record is written.
    /// 5. The order is marked `Completed`.
    ///
    /// A failed CAS aborts with `ConcurrencyConflict` before any balance is touched.
    async fn settle_claimed_order(
        &self,
        order: &Order,
        snapshot: &IssuerCurve,
        quote: &TradeQuote,
    ) -> Result<SettledTrade, TradeEngineError> {
        let mut tx = self.pool.begin().await?;
        let swapped =
            curves::checked_update(snapshot, quote.end_price, quote.new_supply, quote.new_total_usdp, &mut tx).await?;
        if !swapped {
            tx.rollback().await?;
            return Err(TradeEngineError::ConcurrencyConflict { attempts: 1 });
        }
        match order.direction {
            TradeDirection::Buy => {
                ledgers::adjust_currency_balance(&order.user_id, -quote.usdp_amount, &mut tx).await?;
                ledgers::adjust_share_balance(&order.user_id, &order.ticker, quote.pv_amount, &mut tx).await?;
            },
            TradeDirection::Sell => {
                ledgers::adjust_share_balance(&order.user_id, &order.ticker, -quote.pv_amount, &mut tx).await?;
                ledgers::adjust_currency_balance(&order.user_id, quote.usdp_amount, &mut tx).await?;
            },
        }
        let record = NewTransaction {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            ticker: order.ticker.clone(),
            direction: order.direction,
            usdp_amount: quote.usdp_amount,
            pv_amount: quote.pv_amount,
            avg_price: quote.avg_price,
            start_price: quote.start_price,
            end_price: quote.end_price,
            status: TransactionStatus::Completed,
        };
        let transaction = transactions::insert_transaction(record, &mut tx).await?;
        let completed = match orders::complete_processing_order(order.id, &mut tx).await? {
            Some(completed) => completed,
            // the claim gave us exclusive rights, so this indicates the state machine was
            // violated elsewhere; roll everything back
            None => {
                let current = orders::fetch_order_by_order_id(&order.order_id, &mut tx)
                    .await?
                    .ok_or(TradeEngineError::OrderIdNotFound(order.id))?;
                return Err(TradeEngineError::InvalidTransition {
                    from: current.status,
                    to: OrderStatusType::Completed,
                });
            },
        };
        let curve = curves::fetch_curve(&order.ticker, &mut tx)
            .await?
            .ok_or_else(|| TradeEngineError::UnknownTicker(order.ticker.clone()))?;
        tx.commit().await?;
        debug!(
            "🗃️ Order [{}] settled. {} now at {} with supply {}",
            completed.order_id, curve.ticker, curve.current_price, curve.current_supply
        );
        Ok(SettledTrade { order: completed, transaction, curve })
    }

    async fn fail_claimed_order(&self, order: &Order, reason: &TradeEngineError) -> Result<Order, TradeEngineError> {
        let mut tx = self.pool.begin().await?;
        match orders::fail_processing_order(order.id, &reason.to_string(), &mut tx).await? {
            Some(failed) => {
                transactions::insert_transaction(NewTransaction::failed(order), &mut tx).await?;
                tx.commit().await?;
                debug!("🗃️ Order [{}] marked failed: {reason}", failed.order_id);
                Ok(failed)
            },
            // not Processing: an idempotent repeat keeps its single failure record, anything
            // else is a state-machine violation
            None => {
                tx.rollback().await?;
                let current = self
                    .fetch_order_by_order_id(&order.order_id)
                    .await?
                    .ok_or(TradeEngineError::OrderIdNotFound(order.id))?;
                if current.status == OrderStatusType::Failed {
                    Ok(current)
                } else {
                    Err(TradeEngineError::InvalidTransition { from: current.status, to: OrderStatusType::Failed })
                }
            },
        }
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        orders::cancel_order(order_id, &mut conn).await
    }

    async fn fetch_order_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_order_id(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let result = orders::search_orders(query, &mut conn).await?;
        Ok(result)
    }

    async fn pending_order_count(&self) -> Result<i64, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let count = orders::count_with_status(OrderStatusType::Pending, &mut conn).await?;
        Ok(count)
    }

    async fn processing_order_count(&self) -> Result<i64, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let count = orders::count_with_status(OrderStatusType::Processing, &mut conn).await?;
        Ok(count)
    }

    async fn fetch_transaction(&self, id: i64) -> Result<Option<Transaction>, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let transaction = transactions::fetch_transaction(id, &mut conn).await?;
        Ok(transaction)
    }

    async fn fetch_transactions_for_user(&self, user_id: &str) -> Result<Vec<Transaction>, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let result = transactions::fetch_transactions_for_user(user_id, &mut conn).await?;
        Ok(result)
    }

    async fn fetch_transactions_for_order(&self, order_id: &OrderId) -> Result<Vec<Transaction>, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let result = transactions::fetch_transactions_for_order(order_id, &mut conn).await?;
        Ok(result)
    }

    async fn fetch_transactions_for_ticker(&self, ticker: &Ticker) -> Result<Vec<Transaction>, TradeEngineError> {
        let mut conn = self.pool.acquire().await?;
        let result = transactions::fetch_transactions_for_ticker(ticker, &mut conn).await?;
        Ok(result)
    }

    async fn close(&mut self) -> Result<(), TradeEngineError> {
        self.pool.close().await;
        Ok(())
    }
}
