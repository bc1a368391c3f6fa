//! Market-data and order events delivered by the provider.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::OrderId;

/// Top-of-book quote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_size: u64,
    pub ask_size: u64,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn new(
        bid: Decimal,
        ask: Decimal,
        bid_size: u64,
        ask_size: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self { bid, ask, bid_size, ask_size, timestamp }
    }

    pub fn midpoint(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Both sides priced, ask at or above bid.
    pub fn is_usable(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask >= self.bid
    }
}

/// A printed trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Daily bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Broker-side order lifecycle event. For a given order the provider delivers
/// fill and cancel callbacks in causal order, never both for the same
/// terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    Filled {
        order_id: OrderId,
        avg_price: Decimal,
        quantity: Decimal,
        commission: Decimal,
        timestamp: DateTime<Utc>,
    },
    Cancelled {
        order_id: OrderId,
        timestamp: DateTime<Utc>,
    },
}

impl OrderEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            Self::Filled { order_id, .. } | Self::Cancelled { order_id, .. } => *order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quote_midpoint_and_spread() {
        let q = Quote::new(dec!(99.50), dec!(100.50), 10, 10, Utc::now());
        assert_eq!(q.midpoint(), dec!(100.00));
        assert_eq!(q.spread(), dec!(1.00));
        assert!(q.is_usable());
    }

    #[test]
    fn empty_quote_is_not_usable() {
        let q = Quote::new(dec!(0), dec!(0.05), 0, 1, Utc::now());
        assert!(!q.is_usable());
    }
}
