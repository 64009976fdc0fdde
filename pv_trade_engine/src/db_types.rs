use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use pvx_common::{MicroPv, MicroUsdp};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConversionError(String);

//--------------------------------------       Ticker        ---------------------------------------------------------

/// A lightweight wrapper around the symbol identifying one issuer's tradable share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Ticker(pub String);

impl Display for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for Ticker {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl Ticker {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------       OrderId       ---------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderId(pub String);

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------    TradeDirection   ---------------------------------------------------------

/// Which way an order trades against the curve: currency in, shares out, or the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeDirection::Buy => write!(f, "Buy"),
            TradeDirection::Sell => write!(f, "Sell"),
        }
    }
}

impl FromStr for TradeDirection {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Buy" => Ok(Self::Buy),
            "Sell" => Ok(Self::Sell),
            s => Err(ConversionError(format!("Invalid trade direction: {s}"))),
        }
    }
}

//--------------------------------------   OrderStatusType   ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatusType {
    /// The order is queued and has not been picked up by the processor.
    Pending,
    /// A processor has claimed the order and is settling it.
    Processing,
    /// The order settled. Terminal.
    Completed,
    /// Settlement failed; the reason is recorded on the order. Terminal.
    Failed,
    /// The order was cancelled before it was claimed. Terminal.
    Cancelled,
}

impl OrderStatusType {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatusType::Completed | OrderStatusType::Failed | OrderStatusType::Cancelled)
    }

    /// The order state machine. Pending orders may be claimed or cancelled; Processing orders may
    /// only reach a settlement outcome; terminal states never move again.
    pub fn can_transition_to(&self, next: OrderStatusType) -> bool {
        use OrderStatusType::*;
        matches!((self, next), (Pending, Processing) | (Pending, Cancelled) | (Processing, Completed) | (Processing, Failed))
    }
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatusType::Pending => write!(f, "Pending"),
            OrderStatusType::Processing => write!(f, "Processing"),
            OrderStatusType::Completed => write!(f, "Completed"),
            OrderStatusType::Failed => write!(f, "Failed"),
            OrderStatusType::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Processing" => Ok(Self::Processing),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            "Cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

impl From<String> for OrderStatusType {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid order status: {value}. But this conversion cannot fail. Defaulting to Pending");
            OrderStatusType::Pending
        })
    }
}

//--------------------------------------       NewOrder      ---------------------------------------------------------

/// An order as submitted by the external order-placement handler, before it enters the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    /// The client-assigned order id. Enqueueing the same id twice is a no-op.
    pub order_id: OrderId,
    /// The id of the user trading against the curve.
    pub user_id: String,
    /// The issuer being traded.
    pub ticker: Ticker,
    pub direction: TradeDirection,
    /// The USDP to spend. Set for buys, absent for sells.
    pub amount_usdp: Option<MicroUsdp>,
    /// The PV to sell. Set for sells, absent for buys.
    pub amount_pv: Option<MicroPv>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn buy(order_id: OrderId, user_id: impl Into<String>, ticker: Ticker, spend: MicroUsdp) -> Self {
        Self {
            order_id,
            user_id: user_id.into(),
            ticker,
            direction: TradeDirection::Buy,
            amount_usdp: Some(spend),
            amount_pv: None,
            created_at: Utc::now(),
        }
    }

    pub fn sell(order_id: OrderId, user_id: impl Into<String>, ticker: Ticker, quantity: MicroPv) -> Self {
        Self {
            order_id,
            user_id: user_id.into(),
            ticker,
            direction: TradeDirection::Sell,
            amount_usdp: None,
            amount_pv: Some(quantity),
            created_at: Utc::now(),
        }
    }

    /// Checks that the amount matching the direction is present and positive, and that the other
    /// one is absent. Returns a human-readable description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        match self.direction {
            TradeDirection::Buy => {
                if self.amount_pv.is_some() {
                    return Err("a buy order must not carry a PV amount".to_string());
                }
                match self.amount_usdp {
                    Some(spend) if spend.is_positive() => Ok(()),
                    Some(spend) => Err(format!("buy amount must be positive, got {spend}")),
                    None => Err("a buy order must carry a USDP amount".to_string()),
                }
            },
            TradeDirection::Sell => {
                if self.amount_usdp.is_some() {
                    return Err("a sell order must not carry a USDP amount".to_string());
                }
                match self.amount_pv {
                    Some(quantity) if quantity.is_positive() => Ok(()),
                    Some(quantity) => Err(format!("sell quantity must be positive, got {quantity}")),
                    None => Err("a sell order must carry a PV quantity".to_string()),
                }
            },
        }
    }
}

//--------------------------------------        Order        ---------------------------------------------------------

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_id: OrderId,
    pub user_id: String,
    pub ticker: Ticker,
    pub direction: TradeDirection,
    pub amount_usdp: Option<MicroUsdp>,
    pub amount_pv: Option<MicroPv>,
    pub status: OrderStatusType,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------    NewIssuerCurve   ---------------------------------------------------------

/// Parameters for listing an issuer for trading. Supply and holdings start at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIssuerCurve {
    pub ticker: Ticker,
    /// Price of the first share, before any supply exists.
    pub base_price: MicroUsdp,
    /// Marginal price increase per whole PV of outstanding supply.
    pub price_step: MicroUsdp,
}

impl NewIssuerCurve {
    pub fn new(ticker: Ticker, base_price: MicroUsdp, price_step: MicroUsdp) -> Self {
        Self { ticker, base_price, price_step }
    }
}

//--------------------------------------     IssuerCurve     ---------------------------------------------------------

/// Per-ticker bonding curve state. `current_price` is a denormalised cache of
/// `price(current_supply)` and must always be recomputable from `base_price`, `price_step` and
/// `current_supply`; `total_usdp` is the currency the curve holds against its outstanding supply.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct IssuerCurve {
    pub ticker: Ticker,
    pub base_price: MicroUsdp,
    pub price_step: MicroUsdp,
    pub current_price: MicroUsdp,
    pub current_supply: MicroPv,
    pub total_usdp: MicroUsdp,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------  TransactionStatus  ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum TransactionStatus {
    Completed,
    Failed,
    Refunded,
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Completed => write!(f, "Completed"),
            TransactionStatus::Failed => write!(f, "Failed"),
            TransactionStatus::Refunded => write!(f, "Refunded"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            "Refunded" => Ok(Self::Refunded),
            s => Err(ConversionError(format!("Invalid transaction status: {s}"))),
        }
    }
}

//--------------------------------------     Transaction     ---------------------------------------------------------

/// Immutable settlement record, written exactly once per settled order attempt. Refunds are new
/// records, never edits.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub order_id: OrderId,
    pub user_id: String,
    pub ticker: Ticker,
    pub direction: TradeDirection,
    pub usdp_amount: MicroUsdp,
    pub pv_amount: MicroPv,
    pub avg_price: MicroUsdp,
    pub start_price: MicroUsdp,
    pub end_price: MicroUsdp,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------   NewTransaction    ---------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub order_id: OrderId,
    pub user_id: String,
    pub ticker: Ticker,
    pub direction: TradeDirection,
    pub usdp_amount: MicroUsdp,
    pub pv_amount: MicroPv,
    pub avg_price: MicroUsdp,
    pub start_price: MicroUsdp,
    pub end_price: MicroUsdp,
    pub status: TransactionStatus,
}

impl NewTransaction {
    /// Record for a failed settlement attempt: the requested amount is echoed, the unfilled side
    /// and all prices are zero.
    pub fn failed(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            ticker: order.ticker.clone(),
            direction: order.direction,
            usdp_amount: order.amount_usdp.unwrap_or_default(),
            pv_amount: order.amount_pv.unwrap_or_default(),
            avg_price: MicroUsdp::default(),
            start_price: MicroUsdp::default(),
            end_price: MicroUsdp::default(),
            status: TransactionStatus::Failed,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn order_status_transitions_are_monotonic() {
        use OrderStatusType::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        // no way back
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn terminal_states() {
        use OrderStatusType::*;
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Processing.is_terminal());
    }

    #[test]
    fn new_order_validation() {
        let buy = NewOrder::buy("o1".parse().unwrap(), "alice", Ticker::from("ACME"), MicroUsdp::from_usdp(10));
        assert!(buy.validate().is_ok());
        let zero = NewOrder::buy("o2".parse().unwrap(), "alice", Ticker::from("ACME"), MicroUsdp::from(0));
        assert!(zero.validate().is_err());
        let mut confused = NewOrder::sell("o3".parse().unwrap(), "bob", Ticker::from("ACME"), MicroPv::from_pv(1));
        confused.amount_usdp = Some(MicroUsdp::from_usdp(1));
        assert!(confused.validate().is_err());
    }

    #[test]
    fn direction_parses_round_trip() {
        for d in [TradeDirection::Buy, TradeDirection::Sell] {
            assert_eq!(d.to_string().parse::<TradeDirection>().unwrap(), d);
        }
        assert!("Short".parse::<TradeDirection>().is_err());
    }
}
