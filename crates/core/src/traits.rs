//! Collaborator traits consumed by the orchestration core.
//!
//! Each external subsystem (market data, execution, persistence, the
//! option-pricing engine, money management) is an explicitly-constructed
//! service passed in at startup so tests can substitute fakes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::events::{Bar, OrderEvent, Quote, Trade};
use crate::instrument::{Instrument, OptionRight};
use crate::order::{Order, OrderId, OrderSide, OrderType};
use crate::portfolio::{PortfolioId, PortfolioRecord};
use crate::position::{Position, PositionRecord};
use crate::subscription::Subscription;

/// Filter for paged option-series queries.
#[derive(Debug, Clone, Default)]
pub struct SeriesFilter {
    pub expiry: Option<NaiveDate>,
    pub right: Option<OptionRight>,
    pub min_strike: Option<Decimal>,
    pub max_strike: Option<Decimal>,
}

/// Market-data side of the provider.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Resolve a symbol to an instrument. The result may still be missing
    /// its exchange contract; see
    /// [`ExecutionProvider::request_contract_details`].
    async fn resolve_instrument(&self, symbol: &str) -> Result<Instrument>;

    /// Trailing daily bars, most recent last.
    async fn daily_bars(&self, symbol: &str, count: usize) -> Result<Vec<Bar>>;

    /// Option symbols for an underlying, delivered in provider-sized pages
    /// and returned flattened.
    async fn option_series(&self, underlying: &str, filter: &SeriesFilter) -> Result<Vec<String>>;

    fn subscribe_quotes(&self, instrument: &str) -> Subscription<Quote>;
    fn subscribe_trades(&self, instrument: &str) -> Subscription<Trade>;

    /// Most recent quote seen for the instrument, if any.
    fn last_quote(&self, instrument: &str) -> Option<Quote>;
}

/// Execution side of the provider.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Second resolution round trip: fetch exchange contract detail for an
    /// instrument that is not yet registered.
    async fn request_contract_details(
        &self,
        symbol: &str,
        instrument: Instrument,
    ) -> Result<Instrument>;

    /// Construct an order handle in `Created` status with a fresh id.
    fn construct_order(
        &self,
        instrument: &Instrument,
        order_type: OrderType,
        side: OrderSide,
        quantity: Decimal,
    ) -> Order;

    async fn place_order(&self, order: &Order) -> Result<()>;
    async fn cancel_order(&self, order_id: OrderId) -> Result<()>;
    /// Replace the working price of a live order.
    async fn update_order(&self, order: &Order) -> Result<()>;

    /// Fill/cancel events for one order; exactly one tracker subscribes at a
    /// time.
    fn subscribe_order_events(&self, order_id: OrderId) -> Subscription<OrderEvent>;

    /// Minimum tradable increment for the instrument at the given price,
    /// from broker/exchange rules.
    fn min_tick_increment(&self, instrument: &Instrument, price: Decimal) -> Decimal;
}

/// Persistence collaborator, specified only at this boundary.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn portfolio_exists(&self, id: &PortfolioId) -> Result<bool>;
    async fn get_portfolio(&self, id: &PortfolioId) -> Result<Option<PortfolioRecord>>;
    async fn construct_portfolio(&self, record: PortfolioRecord) -> Result<PortfolioRecord>;
    async fn construct_position(&self, record: PositionRecord) -> Result<PositionRecord>;
    async fn update_position_notes(
        &self,
        portfolio: &PortfolioId,
        instrument: &str,
        notes: &str,
    ) -> Result<()>;
}

/// Opaque registration service for the numeric option-pricing engine.
pub trait PricingEngine: Send + Sync {
    fn register_watch(&self, instrument: &Instrument);
    fn register_option(&self, instrument: &Instrument);
    /// Begin Greeks calculation for an (option, underlying) pair.
    fn start_greeks(&self, option: &Instrument, underlying: &Instrument);
    fn stop_greeks(&self, option: &Instrument, underlying: &Instrument);
}

/// Capital-authorization gates. Denial is a veto, not an error.
pub trait MoneyManager: Send + Sync {
    /// Shared "simple" gate keyed by instrument name.
    fn authorize(&self, name: &str) -> bool;
    fn authorize_underlying(
        &self,
        order: &Order,
        position: &Position,
        portfolio: &PortfolioRecord,
    ) -> bool;
    fn authorize_option(
        &self,
        order: &Order,
        position: &Position,
        portfolio: &PortfolioRecord,
        instrument: &Instrument,
    ) -> bool;
}
