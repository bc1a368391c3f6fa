//! Broker order handles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Order type with its price parameter where one applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit { price: Decimal },
    Stop { trigger: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Constructed but not yet handed to the broker.
    Created,
    Submitted,
    Filled,
    Cancelled,
}

/// One broker-side order. Exactly one tracker subscribes to its fill/cancel
/// events at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub instrument_name: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub remaining: Decimal,
    pub status: OrderStatus,
    pub good_till: Option<DateTime<Utc>>,
    pub signal_price: Option<Decimal>,
    pub description: String,
}

impl Order {
    /// Working price of the order, if it has one.
    pub fn price(&self) -> Option<Decimal> {
        match self.order_type {
            OrderType::Market => None,
            OrderType::Limit { price } => Some(price),
            OrderType::Stop { trigger } => Some(trigger),
        }
    }

    /// Replace the working price, keeping the order type.
    pub fn set_price(&mut self, price: Decimal) {
        match &mut self.order_type {
            OrderType::Market => {}
            OrderType::Limit { price: p } => *p = price,
            OrderType::Stop { trigger } => *trigger = price,
        }
    }

    /// Good-till-date from `at` plus `secs`, with sub-second precision
    /// stripped the way the broker expects it.
    pub fn set_good_till(&mut self, at: DateTime<Utc>, secs: i64) {
        let truncated = at - chrono::Duration::nanoseconds(i64::from(at.timestamp_subsec_nanos()));
        self.good_till = Some(truncated + chrono::Duration::seconds(secs));
    }
}
