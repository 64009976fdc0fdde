use serde::{Deserialize, Serialize};

use crate::db_types::{IssuerCurve, Order, OrderId, Transaction};

/// A settled trade: the completed order, its immutable transaction record, and the curve state
/// after the trade was applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettledTrade {
    pub order: Order,
    pub transaction: Transaction,
    pub curve: IssuerCurve,
}

/// Outcome of a single processing pass over the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcessOutcome {
    /// The queue had no pending orders; nothing was claimed.
    NoPendingOrders,
    /// The claimed order settled.
    Settled(SettledTrade),
    /// The claimed order reached a terminal failure; the batch continues.
    OrderFailed { order: Order, reason: String },
}

impl ProcessOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, ProcessOutcome::NoPendingOrders)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Settled(_))
    }

    pub fn order_id(&self) -> Option<&OrderId> {
        match self {
            ProcessOutcome::NoPendingOrders => None,
            ProcessOutcome::Settled(trade) => Some(&trade.order.order_id),
            ProcessOutcome::OrderFailed { order, .. } => Some(&order.order_id),
        }
    }

    pub fn message(&self) -> String {
        match self {
            ProcessOutcome::NoPendingOrders => "No pending orders".to_string(),
            ProcessOutcome::Settled(trade) => {
                format!("Order {} settled in transaction {}", trade.order.order_id, trade.transaction.id)
            },
            ProcessOutcome::OrderFailed { order, reason } => format!("Order {} failed: {reason}", order.order_id),
        }
    }
}

/// Aggregate result of a batch drain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<ProcessOutcome>,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: ProcessOutcome) {
        self.total += 1;
        if outcome.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(outcome);
    }
}
