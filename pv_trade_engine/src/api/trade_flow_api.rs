use std::fmt::Debug;

use log::*;
use pvx_common::{MicroPv, MicroUsdp};

use crate::{
    curve,
    db_types::{NewOrder, Order, OrderId, TradeDirection},
    events::{EventProducers, OrderFailedEvent, OrderSettledEvent},
    traits::{BatchSummary, ProcessOutcome, SettledTrade, TradeEngineError, TradingEngineDatabase},
};

/// How many times a settlement is re-priced against fresh curve state after a concurrent trade
/// invalidates the snapshot, before the order is failed with a concurrency conflict.
const MAX_SETTLE_ATTEMPTS: u32 = 3;

/// Default cap on orders drained by a single [`TradeFlowApi::process_all`] invocation.
pub const DEFAULT_MAX_BATCH: usize = 100;

/// `TradeFlowApi` is the primary API for the order queue: enqueueing orders and draining them
/// through settlement.
///
/// It is the unit of atomicity of the engine: one claimed order either settles completely
/// (ledgers, curve, transaction record, order status — all in one store transaction) or fails
/// cleanly with a recorded reason. The API holds no state of its own beyond the backend handle,
/// so any number of triggers (HTTP, cron, database events) can construct one over the same
/// database and invoke it concurrently.
pub struct TradeFlowApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for TradeFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TradeFlowApi")
    }
}

impl<B> TradeFlowApi<B> {
    pub fn new(db: B) -> Self {
        Self { db, producers: EventProducers::default() }
    }

    pub fn new_with_hooks(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }
}

impl<B> TradeFlowApi<B>
where B: TradingEngineDatabase
{
    /// Submits a new order to the queue.
    ///
    /// The order is validated (positive amount on the side matching the direction, listed
    /// ticker) and inserted in `Pending` state; settlement happens later, when a trigger drains
    /// the queue. Re-submitting an order id is a no-op: the stored order is returned with
    /// `false` in the second element.
    pub async fn enqueue_order(&self, order: NewOrder) -> Result<(Order, bool), TradeEngineError> {
        order.validate().map_err(TradeEngineError::Validation)?;
        if self.db.fetch_issuer_curve(&order.ticker).await?.is_none() {
            return Err(TradeEngineError::Validation(format!("ticker {} is not listed for trading", order.ticker)));
        }
        let (order, inserted) = self.db.insert_order(order).await?;
        if inserted {
            debug!("🔄️ Order [{}] queued for {} by {}", order.order_id, order.ticker, order.user_id);
        } else {
            debug!("🔄️ Order [{}] was already queued. Nothing to do", order.order_id);
        }
        Ok((order, inserted))
    }

    /// Processes at most one order: the "process one" entry point for triggers.
    pub async fn process_next(&self) -> Result<ProcessOutcome, TradeEngineError> {
        self.process_one().await
    }

    /// Drains the queue, one order at a time, until it is empty or `max_batch` orders have been
    /// processed. A failed order is recorded in the summary and never aborts the batch.
    pub async fn process_all(&self, max_batch: usize) -> Result<BatchSummary, TradeEngineError> {
        let mut summary = BatchSummary::default();
        for _ in 0..max_batch {
            match self.process_one().await? {
                ProcessOutcome::NoPendingOrders => break,
                outcome => summary.record(outcome),
            }
        }
        debug!("🔄️ Batch complete. {} orders processed, {} settled, {} failed", summary.total, summary.successful, summary.failed);
        Ok(summary)
    }

    pub async fn pending_order_count(&self) -> Result<i64, TradeEngineError> {
        self.db.pending_order_count().await
    }

    pub async fn processing_order_count(&self) -> Result<i64, TradeEngineError> {
        self.db.processing_order_count().await
    }

    /// Claims and settles a single order.
    ///
    /// Failure taxonomy errors (unknown ticker, insufficient funds, exhausted concurrency
    /// retries, curve rejections) become the order's terminal `Failed` state and an
    /// [`ProcessOutcome::OrderFailed`] result. Store errors before a claim propagate to the
    /// caller with nothing changed; store errors after a claim also propagate, leaving the order
    /// `Processing` for operator attention.
    async fn process_one(&self) -> Result<ProcessOutcome, TradeEngineError> {
        let Some(order) = self.db.claim_next_order().await? else {
            trace!("🔄️ No pending orders to claim");
            return Ok(ProcessOutcome::NoPendingOrders);
        };
        debug!("🔄️ Claimed order [{}]: {} {} for {}", order.order_id, order.direction, order.ticker, order.user_id);
        match self.settle(&order).await {
            Ok(trade) => {
                info!(
                    "🔄️ Order [{}] settled: {} / {} at avg {}",
                    trade.order.order_id, trade.transaction.usdp_amount, trade.transaction.pv_amount, trade.transaction.avg_price
                );
                self.call_order_settled_hook(&trade).await;
                Ok(ProcessOutcome::Settled(trade))
            },
            Err(e) if e.is_order_failure() => {
                warn!("🔄️ Order [{}] failed: {e}", order.order_id);
                let failed = self.db.fail_claimed_order(&order, &e).await?;
                self.call_order_failed_hook(&failed, &e).await;
                Ok(ProcessOutcome::OrderFailed { order: failed, reason: e.to_string() })
            },
            Err(e) => {
                error!(
                    "🔄️ Order [{}] hit a store error mid-settlement and remains Processing. Operator attention is \
                     required; the engine will not reclaim it. {e}",
                    order.order_id
                );
                Err(e)
            },
        }
    }

    /// Prices and applies one claimed order, re-pricing on curve contention.
    ///
    /// The curve row is a single shared aggregate per ticker, so two processors settling
    /// different orders on the same ticker race on it. Settlement is optimistic: snapshot the
    /// curve, price the trade, then apply it conditionally on the snapshot still being current;
    /// on conflict, reload and re-price rather than lock.
    async fn settle(&self, order: &Order) -> Result<SettledTrade, TradeEngineError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let snapshot = self
                .db
                .fetch_issuer_curve(&order.ticker)
                .await?
                .ok_or_else(|| TradeEngineError::UnknownTicker(order.ticker.clone()))?;
            let quote = match order.direction {
                TradeDirection::Buy => {
                    let spend = order
                        .amount_usdp
                        .ok_or_else(|| TradeEngineError::Validation("buy order carries no USDP amount".to_string()))?;
                    self.check_currency_balance(order, spend).await?;
                    curve::quote_buy(&snapshot, spend)?
                },
                TradeDirection::Sell => {
                    let quantity = order
                        .amount_pv
                        .ok_or_else(|| TradeEngineError::Validation("sell order carries no PV quantity".to_string()))?;
                    self.check_share_balance(order, quantity).await?;
                    curve::quote_sell(&snapshot, quantity)?
                },
            };
            match self.db.settle_claimed_order(order, &snapshot, &quote).await {
                Ok(trade) => return Ok(trade),
                Err(TradeEngineError::ConcurrencyConflict { .. }) if attempts < MAX_SETTLE_ATTEMPTS => {
                    debug!(
                        "🔄️ Curve state for {} moved while settling order [{}] (attempt {attempts}). Re-pricing",
                        order.ticker, order.order_id
                    );
                },
                Err(TradeEngineError::ConcurrencyConflict { .. }) => {
                    return Err(TradeEngineError::ConcurrencyConflict { attempts });
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Balance pre-check before pricing. The settlement transaction's conditional debit is the
    /// authoritative check; this avoids a wasted quote and gives a precise failure message.
    async fn check_currency_balance(&self, order: &Order, spend: MicroUsdp) -> Result<(), TradeEngineError> {
        let balance = self.db.currency_balance(&order.user_id).await.map_err(TradeEngineError::Ledger)?;
        if balance < spend {
            return Err(TradeEngineError::InsufficientFunds(format!(
                "user {} holds {balance}, order requires {spend}",
                order.user_id
            )));
        }
        Ok(())
    }

    async fn check_share_balance(&self, order: &Order, quantity: MicroPv) -> Result<(), TradeEngineError> {
        let balance =
            self.db.share_balance(&order.user_id, &order.ticker).await.map_err(TradeEngineError::Ledger)?;
        if balance < quantity {
            return Err(TradeEngineError::InsufficientFunds(format!(
                "user {} holds {balance} of {}, order requires {quantity}",
                order.user_id, order.ticker
            )));
        }
        Ok(())
    }

    async fn call_order_settled_hook(&self, trade: &SettledTrade) {
        for emitter in &self.producers.order_settled_producer {
            trace!("🔄️ Notifying order settled hook subscribers");
            emitter.publish_event(OrderSettledEvent::new(trade.clone())).await;
        }
    }

    async fn call_order_failed_hook(&self, order: &Order, reason: &TradeEngineError) {
        for emitter in &self.producers.order_failed_producer {
            trace!("🔄️ Notifying order failed hook subscribers");
            emitter.publish_event(OrderFailedEvent::new(order.clone(), reason.to_string())).await;
        }
    }

    /// Cancels a pending order on behalf of the external order-placement flow.
    pub async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, TradeEngineError> {
        let order = self.db.cancel_order(order_id).await?;
        debug!("🔄️ Order [{order_id}] cancelled");
        Ok(order)
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}
