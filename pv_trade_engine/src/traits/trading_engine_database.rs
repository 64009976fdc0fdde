use thiserror::Error;

use crate::{
    curve::{CurveError, TradeQuote},
    db_types::{IssuerCurve, NewIssuerCurve, NewOrder, Order, OrderId, OrderStatusType, Ticker, Transaction},
    traits::{data_objects::SettledTrade, LedgerApiError, LedgerManagement},
    OrderQueryFilter,
};

/// This trait defines the highest level of behaviour for backends supporting the trade engine.
///
/// This behaviour includes:
/// * Listing issuers for trading and reading curve state.
/// * Enqueueing orders and the atomic claim protocol that prevents double-processing.
/// * Applying a priced trade to the ledgers and the curve as one all-or-nothing settlement.
/// * Recording immutable transactions and the order/transaction query surface.
#[allow(async_fn_in_trait)]
pub trait TradingEngineDatabase: Clone + LedgerManagement {
    /// The URL of the database.
    fn url(&self) -> &str;

    /// Lists a new issuer for trading with zero supply and zero holdings.
    /// Fails with [`TradeEngineError::TickerAlreadyListed`] if the ticker is taken.
    async fn create_issuer_curve(&self, curve: NewIssuerCurve) -> Result<IssuerCurve, TradeEngineError>;

    async fn fetch_issuer_curve(&self, ticker: &Ticker) -> Result<Option<IssuerCurve>, TradeEngineError>;

    async fn list_issuer_curves(&self) -> Result<Vec<IssuerCurve>, TradeEngineError>;

    /// Inserts the order into the queue in `Pending` state. This call is idempotent on the
    /// client-assigned order id: the second element of the result is `false` when the order
    /// already existed and the stored record is returned unchanged.
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), TradeEngineError>;

    /// Atomically claims the oldest pending order: selects it and transitions it to
    /// `Processing` in a single store operation, so two concurrent callers can never claim the
    /// same row. Returns `None` when nothing is pending. Cancelled orders are never returned.
    async fn claim_next_order(&self) -> Result<Option<Order>, TradeEngineError>;

    /// Applies a priced trade in ONE all-or-nothing transaction: compare-and-swap the curve row
    /// against the `snapshot` it was priced from, debit/credit the currency and share ledgers,
    /// write the transaction record, and mark the order `Completed`.
    ///
    /// If the curve row no longer matches the snapshot (a concurrent trade on the same ticker
    /// settled first) the transaction is rolled back and
    /// [`TradeEngineError::ConcurrencyConflict`] is returned; the caller re-prices against fresh
    /// state and tries again.
    async fn settle_claimed_order(
        &self,
        order: &Order,
        snapshot: &IssuerCurve,
        quote: &TradeQuote,
    ) -> Result<SettledTrade, TradeEngineError>;

    /// Marks a claimed order `Failed` with the given reason and writes the failed transaction
    /// record, atomically. Calling this twice with the same terminal outcome is a no-op.
    async fn fail_claimed_order(&self, order: &Order, reason: &TradeEngineError) -> Result<Order, TradeEngineError>;

    /// Transitions a `Pending` order to `Cancelled`. Cancelling an already-cancelled order is a
    /// no-op; any other state fails with [`TradeEngineError::InvalidTransition`]. The order
    /// processor never calls this; it exists for the external order-placement flow.
    async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, TradeEngineError>;

    async fn fetch_order_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>, TradeEngineError>;

    /// Fetches orders matching the filter, oldest first.
    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, TradeEngineError>;

    async fn pending_order_count(&self) -> Result<i64, TradeEngineError>;

    /// Orders currently claimed but not yet terminal. A persistently non-zero value with an idle
    /// processor indicates orders stranded by a mid-settlement crash, which require operator
    /// attention; the engine never reclaims them automatically.
    async fn processing_order_count(&self) -> Result<i64, TradeEngineError>;

    async fn fetch_transaction(&self, id: i64) -> Result<Option<Transaction>, TradeEngineError>;

    async fn fetch_transactions_for_user(&self, user_id: &str) -> Result<Vec<Transaction>, TradeEngineError>;

    async fn fetch_transactions_for_order(&self, order_id: &OrderId) -> Result<Vec<Transaction>, TradeEngineError>;

    /// The issuer's full trade history, oldest first.
    async fn fetch_transactions_for_ticker(&self, ticker: &Ticker) -> Result<Vec<Transaction>, TradeEngineError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), TradeEngineError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum TradeEngineError {
    #[error("The order store is unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Order validation failed: {0}")]
    Validation(String),
    #[error("Ticker {0} is not listed for trading")]
    UnknownTicker(Ticker),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("The curve state changed {attempts} time(s) during settlement; giving up")]
    ConcurrencyConflict { attempts: u32 },
    #[error("Invalid order status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatusType, to: OrderStatusType },
    #[error("Ticker {0} is already listed")]
    TickerAlreadyListed(Ticker),
    #[error("Cannot insert order, since it already exists with id {0}")]
    OrderAlreadyExists(OrderId),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The requested order (internal id {0}) does not exist")]
    OrderIdNotFound(i64),
    #[error("{0}")]
    Curve(#[from] CurveError),
    #[error("{0}")]
    Ledger(#[from] LedgerApiError),
}

impl TradeEngineError {
    /// Whether this error is a terminal failure of the order being processed (recorded on the
    /// order, batch continues) rather than an infrastructure error that must propagate to the
    /// caller.
    pub fn is_order_failure(&self) -> bool {
        use TradeEngineError::*;
        match self {
            UnknownTicker(_) | InsufficientFunds(_) | ConcurrencyConflict { .. } | Curve(_) | Validation(_) => true,
            Ledger(LedgerApiError::InsufficientFunds { .. }) | Ledger(LedgerApiError::InsufficientShares { .. }) => {
                true
            },
            _ => false,
        }
    }
}

impl From<sqlx::Error> for TradeEngineError {
    fn from(e: sqlx::Error) -> Self {
        TradeEngineError::StoreUnavailable(e.to_string())
    }
}
