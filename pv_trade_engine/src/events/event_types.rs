use serde::{Deserialize, Serialize};

use crate::{db_types::Order, traits::SettledTrade};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSettledEvent {
    pub trade: SettledTrade,
}

impl OrderSettledEvent {
    pub fn new(trade: SettledTrade) -> Self {
        Self { trade }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFailedEvent {
    pub order: Order,
    pub reason: String,
}

impl OrderFailedEvent {
    pub fn new(order: Order, reason: String) -> Self {
        Self { order, reason }
    }
}

#[derive(Debug, Clone)]
pub enum EventType {
    OrderSettled(OrderSettledEvent),
    OrderFailed(OrderFailedEvent),
}
