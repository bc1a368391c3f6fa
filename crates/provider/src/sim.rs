//! Simulated market data / execution provider.
//!
//! Implements the full provider boundary against in-memory state so the
//! orchestration pipeline can run end-to-end without a broker session:
//! symbol resolution with an optional contract-detail round trip, quote and
//! trade dispatch, order lifecycle events, and option-series queries. Tests
//! drive the market by pushing quotes/trades and filling or cancelling
//! orders explicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use basket_trade_core::errors::TradeError;
use basket_trade_core::events::{Bar, OrderEvent, Quote, Trade};
use basket_trade_core::instrument::{Instrument, OptionRight};
use basket_trade_core::order::{Order, OrderId, OrderSide, OrderStatus, OrderType};
use basket_trade_core::subscription::Subscription;
use basket_trade_core::traits::{ExecutionProvider, MarketData, SeriesFilter};

use crate::dispatch::Dispatch;

/// Parse the canonical `UL-YYYYMMDD-R-STRIKE` option symbol.
pub fn parse_option_symbol(symbol: &str) -> Option<(String, NaiveDate, Decimal, OptionRight)> {
    let mut parts = symbol.rsplitn(4, '-');
    let strike: Decimal = parts.next()?.parse().ok()?;
    let right = match parts.next()? {
        "C" => OptionRight::Call,
        "P" => OptionRight::Put,
        _ => return None,
    };
    let expiry = NaiveDate::parse_from_str(parts.next()?, "%Y%m%d").ok()?;
    let underlying = parts.next()?.to_string();
    Some((underlying, expiry, strike, right))
}

struct SimInner {
    instruments: HashMap<String, Instrument>,
    bars: HashMap<String, Vec<Bar>>,
    series: HashMap<String, Vec<String>>,
    last_quotes: HashMap<String, Quote>,
    orders: HashMap<OrderId, Order>,
    next_contract: i64,
    supports_contract_details: bool,
}

pub struct SimProvider {
    inner: Mutex<SimInner>,
    quotes: Arc<Dispatch<String, Quote>>,
    trades: Arc<Dispatch<String, Trade>>,
    order_events: Arc<Dispatch<OrderId, OrderEvent>>,
    next_order_id: AtomicU64,
    commission_per_unit: Decimal,
}

impl Default for SimProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimProvider {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SimInner {
                instruments: HashMap::new(),
                bars: HashMap::new(),
                series: HashMap::new(),
                last_quotes: HashMap::new(),
                orders: HashMap::new(),
                next_contract: 1000,
                supports_contract_details: true,
            }),
            quotes: Dispatch::new(),
            trades: Dispatch::new(),
            order_events: Dispatch::new(),
            next_order_id: AtomicU64::new(1),
            commission_per_unit: dec!(0.65),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an equity symbol as fully contract-resolved.
    pub fn register_equity(&self, symbol: &str) {
        let mut inner = self.lock();
        let mut inst = Instrument::equity(symbol);
        inner.next_contract += 1;
        inst.contract_id = Some(inner.next_contract);
        inner.instruments.insert(inst.name.clone(), inst);
    }

    /// Register an equity symbol whose contract detail must still be fetched
    /// through the execution side.
    pub fn stage_equity(&self, symbol: &str) {
        let inst = Instrument::equity(symbol);
        self.lock().instruments.insert(inst.name.clone(), inst);
    }

    /// Disable the contract-detail round trip so staged symbols fail to
    /// resolve.
    pub fn disable_contract_details(&self) {
        self.lock().supports_contract_details = false;
    }

    pub fn set_daily_bars(&self, symbol: &str, bars: Vec<Bar>) {
        self.lock().bars.insert(symbol.to_uppercase(), bars);
    }

    /// The option symbol universe returned for an underlying.
    pub fn set_option_series(&self, underlying: &str, symbols: Vec<String>) {
        self.lock().series.insert(underlying.to_uppercase(), symbols);
    }

    /// Push a quote: stored as the last quote and dispatched to subscribers.
    pub fn push_quote(&self, symbol: &str, quote: Quote) {
        self.lock().last_quotes.insert(symbol.to_string(), quote);
        self.quotes.publish(&symbol.to_string(), quote);
    }

    pub fn push_trade(&self, symbol: &str, trade: Trade) {
        self.trades.publish(&symbol.to_string(), trade);
    }

    /// Fill a submitted order in full at the given price.
    pub fn fill_order(&self, order_id: OrderId, price: Decimal) -> Result<()> {
        let (quantity, commission) = {
            let mut inner = self.lock();
            let Some(order) = inner.orders.get_mut(&order_id) else {
                bail!("fill for unknown order {order_id}");
            };
            if order.status != OrderStatus::Submitted {
                bail!("order {order_id} is not live: {:?}", order.status);
            }
            order.status = OrderStatus::Filled;
            let quantity = order.remaining;
            order.remaining = Decimal::ZERO;
            (quantity, self.commission_per_unit * quantity)
        };
        self.order_events.publish(
            &order_id,
            OrderEvent::Filled {
                order_id,
                avg_price: price,
                quantity,
                commission,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn order(&self, order_id: OrderId) -> Option<Order> {
        self.lock().orders.get(&order_id).cloned()
    }

    pub fn submitted_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Submitted)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        orders
    }

    pub fn all_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.lock().orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        orders
    }
}

#[async_trait]
impl MarketData for SimProvider {
    async fn resolve_instrument(&self, symbol: &str) -> Result<Instrument> {
        let mut inner = self.lock();
        if let Some(inst) = inner.instruments.get(&symbol.to_uppercase()) {
            return Ok(inst.clone());
        }
        if let Some(inst) = inner.instruments.get(symbol) {
            return Ok(inst.clone());
        }
        // Options resolve from their canonical name; the contract registers
        // on first resolution.
        if let Some((underlying, expiry, strike, right)) = parse_option_symbol(symbol) {
            let mut inst = Instrument::option(&underlying, expiry, strike, right);
            inner.next_contract += 1;
            inst.contract_id = Some(inner.next_contract);
            inner.instruments.insert(inst.name.clone(), inst.clone());
            debug!(symbol, "Resolved option instrument");
            return Ok(inst);
        }
        bail!("unknown symbol {symbol}");
    }

    async fn daily_bars(&self, symbol: &str, count: usize) -> Result<Vec<Bar>> {
        let inner = self.lock();
        let bars = inner
            .bars
            .get(&symbol.to_uppercase())
            .cloned()
            .unwrap_or_default();
        let skip = bars.len().saturating_sub(count);
        Ok(bars[skip..].to_vec())
    }

    async fn option_series(&self, underlying: &str, filter: &SeriesFilter) -> Result<Vec<String>> {
        let all = self
            .lock()
            .series
            .get(&underlying.to_uppercase())
            .cloned()
            .unwrap_or_default();
        let matching = all
            .into_iter()
            .filter(|symbol| {
                let Some((_, expiry, strike, right)) = parse_option_symbol(symbol) else {
                    return false;
                };
                filter.expiry.map_or(true, |e| e == expiry)
                    && filter.right.map_or(true, |r| r == right)
                    && filter.min_strike.map_or(true, |m| strike >= m)
                    && filter.max_strike.map_or(true, |m| strike <= m)
            })
            .collect();
        Ok(matching)
    }

    fn subscribe_quotes(&self, instrument: &str) -> Subscription<Quote> {
        self.quotes.subscribe(instrument.to_string())
    }

    fn subscribe_trades(&self, instrument: &str) -> Subscription<Trade> {
        self.trades.subscribe(instrument.to_string())
    }

    fn last_quote(&self, instrument: &str) -> Option<Quote> {
        self.lock().last_quotes.get(instrument).copied()
    }
}

#[async_trait]
impl ExecutionProvider for SimProvider {
    async fn request_contract_details(
        &self,
        symbol: &str,
        mut instrument: Instrument,
    ) -> Result<Instrument> {
        let mut inner = self.lock();
        if !inner.supports_contract_details {
            return Err(TradeError::ProviderUnavailable(symbol.to_string()).into());
        }
        inner.next_contract += 1;
        instrument.contract_id = Some(inner.next_contract);
        inner
            .instruments
            .insert(instrument.name.clone(), instrument.clone());
        info!(symbol, contract = ?instrument.contract_id, "Contract details resolved");
        Ok(instrument)
    }

    fn construct_order(
        &self,
        instrument: &Instrument,
        order_type: OrderType,
        side: OrderSide,
        quantity: Decimal,
    ) -> Order {
        let id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        Order {
            id,
            instrument_name: instrument.name.clone(),
            order_type,
            side,
            quantity,
            remaining: quantity,
            status: OrderStatus::Created,
            good_till: None,
            signal_price: None,
            description: String::new(),
        }
    }

    async fn place_order(&self, order: &Order) -> Result<()> {
        let mut inner = self.lock();
        let mut live = order.clone();
        live.status = OrderStatus::Submitted;
        debug!(order_id = order.id, instrument = %order.instrument_name, "Order placed");
        inner.orders.insert(order.id, live);
        Ok(())
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<()> {
        {
            let mut inner = self.lock();
            let Some(order) = inner.orders.get_mut(&order_id) else {
                bail!("cancel for unknown order {order_id}");
            };
            if order.status != OrderStatus::Submitted {
                debug!(order_id, status = ?order.status, "Cancel ignored; order not live");
                return Ok(());
            }
            order.status = OrderStatus::Cancelled;
        }
        self.order_events.publish(
            &order_id,
            OrderEvent::Cancelled {
                order_id,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut inner = self.lock();
        let Some(live) = inner.orders.get_mut(&order.id) else {
            bail!("update for unknown order {}", order.id);
        };
        live.order_type = order.order_type;
        Ok(())
    }

    fn subscribe_order_events(&self, order_id: OrderId) -> Subscription<OrderEvent> {
        self.order_events.subscribe(order_id)
    }

    fn min_tick_increment(&self, instrument: &Instrument, price: Decimal) -> Decimal {
        // US equity-style exchange rule: penny increments at a dollar and
        // above, hundredths of a cent below.
        if instrument.is_registered() {
            if price >= Decimal::ONE {
                dec!(0.01)
            } else {
                dec!(0.0001)
            }
        } else {
            instrument.min_tick
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bid: Decimal, ask: Decimal) -> Quote {
        Quote::new(bid, ask, 10, 10, Utc::now())
    }

    #[test]
    fn option_symbols_round_trip() {
        let expiry = NaiveDate::from_ymd_opt(2026, 6, 19).unwrap();
        let name = basket_trade_core::option_name("XYZ", expiry, dec!(105), OptionRight::Call);
        let (ul, e, k, r) = parse_option_symbol(&name).unwrap();
        assert_eq!(ul, "XYZ");
        assert_eq!(e, expiry);
        assert_eq!(k, dec!(105));
        assert_eq!(r, OptionRight::Call);
        assert!(parse_option_symbol("XYZ").is_none());
    }

    #[tokio::test]
    async fn staged_equity_requires_contract_details() {
        let sim = SimProvider::new();
        sim.stage_equity("XYZ");

        let inst = sim.resolve_instrument("XYZ").await.unwrap();
        assert!(!inst.is_registered());

        let inst = sim.request_contract_details("XYZ", inst).await.unwrap();
        assert!(inst.is_registered());

        // Second resolution returns the registered instrument directly.
        let again = sim.resolve_instrument("XYZ").await.unwrap();
        assert!(again.is_registered());
    }

    #[tokio::test]
    async fn contract_details_can_be_unavailable() {
        let sim = SimProvider::new();
        sim.stage_equity("XYZ");
        sim.disable_contract_details();

        let inst = sim.resolve_instrument("XYZ").await.unwrap();
        let err = sim.request_contract_details("XYZ", inst).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TradeError>(),
            Some(TradeError::ProviderUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn order_fill_reaches_subscriber() {
        let sim = SimProvider::new();
        sim.register_equity("XYZ");
        let inst = sim.resolve_instrument("XYZ").await.unwrap();

        let order = sim.construct_order(
            &inst,
            OrderType::Limit { price: dec!(10) },
            OrderSide::Buy,
            dec!(100),
        );
        let mut events = sim.subscribe_order_events(order.id);
        sim.place_order(&order).await.unwrap();
        assert_eq!(sim.submitted_orders().len(), 1);

        sim.fill_order(order.id, dec!(10)).unwrap();
        match events.recv().await.unwrap() {
            OrderEvent::Filled { avg_price, quantity, .. } => {
                assert_eq!(avg_price, dec!(10));
                assert_eq!(quantity, dec!(100));
            }
            other => panic!("expected fill, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_of_filled_order_is_ignored() {
        let sim = SimProvider::new();
        sim.register_equity("XYZ");
        let inst = sim.resolve_instrument("XYZ").await.unwrap();
        let order = sim.construct_order(&inst, OrderType::Market, OrderSide::Buy, dec!(1));
        let mut events = sim.subscribe_order_events(order.id);
        sim.place_order(&order).await.unwrap();
        sim.fill_order(order.id, dec!(5)).unwrap();

        sim.cancel_order(order.id).await.unwrap();
        assert!(matches!(events.recv().await, Some(OrderEvent::Filled { .. })));
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn option_series_applies_filters() {
        let sim = SimProvider::new();
        let expiry = NaiveDate::from_ymd_opt(2026, 6, 19).unwrap();
        let symbols: Vec<String> = [95, 100, 105]
            .iter()
            .flat_map(|s| {
                [
                    basket_trade_core::option_name("XYZ", expiry, Decimal::from(*s), OptionRight::Call),
                    basket_trade_core::option_name("XYZ", expiry, Decimal::from(*s), OptionRight::Put),
                ]
            })
            .collect();
        sim.set_option_series("XYZ", symbols);

        let calls = sim
            .option_series(
                "XYZ",
                &SeriesFilter {
                    right: Some(OptionRight::Call),
                    min_strike: Some(dec!(100)),
                    ..SeriesFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn tick_rule_depends_on_price() {
        let sim = SimProvider::new();
        sim.register_equity("XYZ");
        let mut inst = Instrument::equity("XYZ");
        inst.contract_id = Some(1);
        assert_eq!(sim.min_tick_increment(&inst, dec!(25.00)), dec!(0.01));
        assert_eq!(sim.min_tick_increment(&inst, dec!(0.50)), dec!(0.0001));
    }
}
