//! Positions: the persisted record and the live runtime handle.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::events::Quote;
use crate::instrument::Instrument;
use crate::order::OrderSide;
use crate::portfolio::PortfolioId;

/// Persisted row for one instrument's holding inside exactly one portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub portfolio_id: PortfolioId,
    pub instrument_name: String,
    /// Signed size; zero when flat.
    pub active_size: Decimal,
    pub side: OrderSide,
    pub notes: String,
}

impl PositionRecord {
    pub fn new(portfolio_id: impl Into<PortfolioId>, instrument_name: &str) -> Self {
        Self {
            portfolio_id: portfolio_id.into(),
            instrument_name: instrument_name.to_string(),
            active_size: Decimal::ZERO,
            side: OrderSide::Buy,
            notes: String::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.active_size.is_zero()
    }
}

/// Snapshot of a position's running statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionStats {
    pub unrealized: Decimal,
    pub realized: Decimal,
    pub commission: Decimal,
}

impl PositionStats {
    pub fn net(&self) -> Decimal {
        self.unrealized + self.realized - self.commission
    }
}

#[derive(Debug)]
struct PositionInner {
    record: PositionRecord,
    avg_price: Decimal,
    last_quote: Option<Quote>,
    realized: Decimal,
    commission: Decimal,
}

/// Runtime position handle: the persisted record plus live quote and P/L
/// statistics, shared between the cache, the owning strategy, and any
/// trackers watching the leg.
#[derive(Debug)]
pub struct Position {
    instrument: Instrument,
    inner: Mutex<PositionInner>,
}

impl Position {
    pub fn new(record: PositionRecord, instrument: Instrument) -> Self {
        debug_assert_eq!(record.instrument_name, instrument.name);
        Self {
            instrument,
            inner: Mutex::new(PositionInner {
                record,
                avg_price: Decimal::ZERO,
                last_quote: None,
                realized: Decimal::ZERO,
                commission: Decimal::ZERO,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PositionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn record(&self) -> PositionRecord {
        self.lock().record.clone()
    }

    pub fn is_active(&self) -> bool {
        self.lock().record.is_active()
    }

    pub fn active_size(&self) -> Decimal {
        self.lock().record.active_size
    }

    pub fn notes(&self) -> String {
        self.lock().record.notes.clone()
    }

    pub fn set_notes(&self, notes: &str) {
        self.lock().record.notes = notes.to_string();
    }

    pub fn last_quote(&self) -> Option<Quote> {
        self.lock().last_quote
    }

    pub fn update_quote(&self, quote: Quote) {
        self.lock().last_quote = Some(quote);
    }

    /// Apply a fill, maintaining signed size, average price, and realized
    /// P/L net of commission when the fill reduces the position.
    pub fn apply_fill(&self, side: OrderSide, quantity: Decimal, price: Decimal, commission: Decimal) {
        let mut inner = self.lock();
        inner.commission += commission;
        let size = inner.record.active_size;
        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };

        if size.is_zero() || (size > Decimal::ZERO) == (signed > Decimal::ZERO) {
            // Opening or adding: weighted average entry price.
            let total_cost = inner.avg_price * size.abs() + price * quantity;
            inner.record.active_size = size + signed;
            inner.avg_price = total_cost / inner.record.active_size.abs();
            inner.record.side = side;
        } else {
            // Reducing or closing.
            let close_quantity = quantity.min(size.abs());
            let pnl = if size > Decimal::ZERO {
                (price - inner.avg_price) * close_quantity
            } else {
                (inner.avg_price - price) * close_quantity
            };
            inner.realized += pnl * self.instrument.multiplier;
            inner.record.active_size = size + signed;
            if inner.record.active_size.is_zero() {
                inner.avg_price = Decimal::ZERO;
            }
        }
    }

    /// Unrealized P/L marked to the exit side of the last quote.
    pub fn unrealized_pnl(&self) -> Decimal {
        let inner = self.lock();
        let size = inner.record.active_size;
        let Some(quote) = inner.last_quote else {
            return Decimal::ZERO;
        };
        if size.is_zero() {
            return Decimal::ZERO;
        }
        let per_share = if size > Decimal::ZERO {
            quote.bid - inner.avg_price
        } else {
            inner.avg_price - quote.ask
        };
        per_share * size.abs() * self.instrument.multiplier
    }

    pub fn stats(&self) -> PositionStats {
        let unrealized = self.unrealized_pnl();
        let inner = self.lock();
        PositionStats {
            unrealized,
            realized: inner.realized,
            commission: inner.commission,
        }
    }
}
