//! Order lifecycle tracker: a state machine owning the live orders of one
//! logical trade, turning broker fill/cancel events into trade-state
//! transitions and audit labels.

use std::sync::Arc;
use std::task::Poll;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use basket_trade_core::chart::{ChartSink, TreeId};
use basket_trade_core::errors::TradeError;
use basket_trade_core::events::OrderEvent;
use basket_trade_core::order::{Order, OrderSide, OrderType};
use basket_trade_core::position::{Position, PositionStats};
use basket_trade_core::subscription::Subscription;
use basket_trade_core::traits::ExecutionProvider;

/// Trade states. `Search` loops back to await the next entry signal;
/// `EndOfDayCancel`/`EndOfDayNeutral` are one-shot terminal sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    Init,
    Search,
    EntrySubmitted,
    ExitSignal,
    ExitSubmitted,
    NoTrade,
    EndOfDayCancel,
    EndOfDayNeutral,
    Done,
}

/// Submission arguments: signal price for the audit label, optional limit
/// and good-till duration.
#[derive(Debug, Clone, Copy)]
pub struct OrderArgs {
    pub at: DateTime<Utc>,
    pub signal: Decimal,
    pub limit: Decimal,
    pub duration: Option<i64>,
}

impl OrderArgs {
    pub fn market(at: DateTime<Utc>, signal: Decimal) -> Self {
        Self { at, signal, limit: Decimal::ZERO, duration: None }
    }

    pub fn limit(at: DateTime<Utc>, signal: Decimal, limit: Decimal) -> Self {
        Self { at, signal, limit, duration: None }
    }

    pub fn good_till(mut self, secs: i64) -> Self {
        self.duration = Some(secs);
        self
    }
}

struct PendingOrder {
    order: Order,
    events: Subscription<OrderEvent>,
}

pub struct TrackOrder {
    state: TradeState,
    quantity: Decimal,
    position: Arc<Position>,
    execution: Arc<dyn ExecutionProvider>,
    chart: Arc<dyn ChartSink>,
    tree: TreeId,
    /// At most one pending order per logical slot.
    pending: Option<PendingOrder>,
    /// End-of-day flatten order, outside the entry/exit slot.
    flatten: Option<PendingOrder>,
}

impl TrackOrder {
    pub fn new(
        position: Arc<Position>,
        execution: Arc<dyn ExecutionProvider>,
        chart: Arc<dyn ChartSink>,
        tree: TreeId,
        quantity: Decimal,
    ) -> Self {
        Self {
            state: TradeState::Init,
            quantity,
            position,
            execution,
            chart,
            tree,
            pending: None,
            flatten: None,
        }
    }

    pub fn state(&self) -> TradeState {
        self.state
    }

    pub fn position(&self) -> &Arc<Position> {
        &self.position
    }

    pub fn set_no_trade(&mut self) {
        self.state = TradeState::NoTrade;
    }

    pub fn query_stats(&self) -> PositionStats {
        self.position.stats()
    }

    /// Minimum tradable increment at this price, from broker/exchange rules.
    pub fn price_interval(&self, price: Decimal) -> Decimal {
        self.execution
            .min_tick_increment(self.position.instrument(), price)
    }

    /// Snap a price to the instrument's minimum tradable increment.
    pub fn normalize(&self, price: Decimal) -> Decimal {
        let interval = self.price_interval(price);
        if interval.is_zero() {
            return price;
        }
        (price / interval).round() * interval
    }

    /// Construct an order for the authorization gates; submission is a
    /// separate step so a denial leaves no live order behind.
    pub fn prepare(&self, order_type: OrderType, side: OrderSide) -> Order {
        let order_type = match order_type {
            OrderType::Limit { price } => OrderType::Limit { price: self.normalize(price) },
            OrderType::Stop { trigger } => OrderType::Stop { trigger: self.normalize(trigger) },
            OrderType::Market => OrderType::Market,
        };
        self.execution
            .construct_order(self.position.instrument(), order_type, side, self.quantity)
    }

    async fn submit(
        &mut self,
        mut order: Order,
        args: &OrderArgs,
        label: String,
        next_state: TradeState,
    ) -> Result<()> {
        if self.pending.is_some() {
            return Err(TradeError::SlotOccupied("pending").into());
        }
        order.signal_price = Some(args.signal);
        if let Some(secs) = args.duration {
            order.set_good_till(args.at, secs);
        }
        self.chart.add_label(self.tree, args.at, args.signal, &label);
        let events = self.execution.subscribe_order_events(order.id);
        self.execution.place_order(&order).await?;
        self.pending = Some(PendingOrder { order, events });
        self.state = next_state;
        Ok(())
    }

    /// Submit a pre-authorized entry order.
    pub async fn submit_entry(&mut self, order: Order, args: &OrderArgs) -> Result<()> {
        let tag = match order.side {
            OrderSide::Buy => "LeS-",
            OrderSide::Sell => "SeS-",
        };
        let label = format!("{tag}{}", order.id);
        self.submit(order, args, label, TradeState::EntrySubmitted).await
    }

    /// Submit a pre-authorized exit order.
    pub async fn submit_exit(&mut self, order: Order, args: &OrderArgs) -> Result<()> {
        let tag = match order.side {
            OrderSide::Buy => "SxS1-",
            OrderSide::Sell => "LxS1-",
        };
        let label = format!("{tag}{}", order.id);
        self.submit(order, args, label, TradeState::ExitSubmitted).await
    }

    pub async fn enter_long_limit(&mut self, args: OrderArgs) -> Result<()> {
        let order = self.prepare(OrderType::Limit { price: args.limit }, OrderSide::Buy);
        self.submit_entry(order, &args).await
    }

    pub async fn enter_long_market(&mut self, args: OrderArgs) -> Result<()> {
        let order = self.prepare(OrderType::Market, OrderSide::Buy);
        self.submit_entry(order, &args).await
    }

    pub async fn enter_short_limit(&mut self, args: OrderArgs) -> Result<()> {
        let order = self.prepare(OrderType::Limit { price: args.limit }, OrderSide::Sell);
        self.submit_entry(order, &args).await
    }

    pub async fn enter_short_market(&mut self, args: OrderArgs) -> Result<()> {
        let order = self.prepare(OrderType::Market, OrderSide::Sell);
        self.submit_entry(order, &args).await
    }

    pub async fn exit_long_limit(&mut self, args: OrderArgs) -> Result<()> {
        let order = self.prepare(OrderType::Limit { price: args.limit }, OrderSide::Sell);
        self.submit_exit(order, &args).await
    }

    pub async fn exit_long_market(&mut self, args: OrderArgs) -> Result<()> {
        let order = self.prepare(OrderType::Market, OrderSide::Sell);
        self.submit_exit(order, &args).await
    }

    pub async fn exit_short_limit(&mut self, args: OrderArgs) -> Result<()> {
        let order = self.prepare(OrderType::Limit { price: args.limit }, OrderSide::Buy);
        self.submit_exit(order, &args).await
    }

    pub async fn exit_short_market(&mut self, args: OrderArgs) -> Result<()> {
        let order = self.prepare(OrderType::Market, OrderSide::Buy);
        self.submit_exit(order, &args).await
    }

    /// Poll for the next event on any live order; pending while none is
    /// live.
    pub fn poll_order_event(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Option<OrderEvent>> {
        if let Some(pending) = self.pending.as_mut() {
            if let Poll::Ready(Some(event)) = pending.events.poll_recv(cx) {
                return Poll::Ready(Some(event));
            }
        }
        if let Some(flatten) = self.flatten.as_mut() {
            if let Poll::Ready(Some(event)) = flatten.events.poll_recv(cx) {
                return Poll::Ready(Some(event));
            }
        }
        Poll::Pending
    }

    /// Await the next event for any live order; pends while none is live.
    pub async fn next_order_event(&mut self) -> Option<OrderEvent> {
        std::future::poll_fn(|cx| self.poll_order_event(cx)).await
    }

    pub fn handle_order_event(&mut self, event: OrderEvent) {
        match event {
            OrderEvent::Filled {
                order_id,
                avg_price,
                quantity,
                commission,
                timestamp,
            } => self.handle_filled(order_id, avg_price, quantity, commission, timestamp),
            OrderEvent::Cancelled { order_id, timestamp } => {
                self.handle_cancelled(order_id, timestamp);
            }
        }
    }

    fn handle_filled(
        &mut self,
        order_id: u64,
        avg_price: Decimal,
        quantity: Decimal,
        commission: Decimal,
        at: DateTime<Utc>,
    ) {
        if self.flatten.as_ref().map(|p| p.order.id) == Some(order_id) {
            if let Some(flatten) = self.flatten.take() {
                self.position
                    .apply_fill(flatten.order.side, quantity, avg_price, commission);
                self.chart.add_label(self.tree, at, avg_price, "Neutral Fill");
            }
            return;
        }
        let Some(pending) = self.pending.take() else {
            warn!(order_id, "Fill for an order no longer tracked");
            return;
        };
        self.position
            .apply_fill(pending.order.side, quantity, avg_price, commission);
        match self.state {
            TradeState::EntrySubmitted => {
                self.chart.add_label(self.tree, at, avg_price, "Entry Fill");
                self.state = TradeState::ExitSignal;
            }
            TradeState::ExitSubmitted => {
                self.chart.add_label(self.tree, at, avg_price, "Exit Fill");
                self.state = TradeState::Search;
            }
            TradeState::EndOfDayCancel | TradeState::EndOfDayNeutral | TradeState::Done => {}
            _ => {
                debug_assert!(false, "fill in state {:?}", self.state);
                warn!(order_id, state = ?self.state, "Fill in unexpected state");
            }
        }
    }

    fn handle_cancelled(&mut self, order_id: u64, _at: DateTime<Utc>) {
        if self.flatten.as_ref().map(|p| p.order.id) == Some(order_id) {
            self.flatten = None;
            info!(
                instrument = %self.position.instrument().name,
                order_id,
                "Flatten order cancelled"
            );
            return;
        }
        let Some(_pending) = self.pending.take() else {
            warn!(order_id, "Cancel for an order no longer tracked");
            return;
        };
        match self.state {
            TradeState::EndOfDayCancel | TradeState::EndOfDayNeutral => {
                info!(
                    instrument = %self.position.instrument().name,
                    order_id,
                    "Order cancelled - end of day"
                );
            }
            TradeState::EntrySubmitted => {
                // cancels happen here due to limit time out
                info!(
                    instrument = %self.position.instrument().name,
                    order_id,
                    "Entry cancelled"
                );
                self.state = TradeState::Search;
            }
            TradeState::ExitSubmitted => {
                // No retry policy for a cancelled exit; the end-of-day
                // neutral sweep bounds the exposure.
                error!(
                    instrument = %self.position.instrument().name,
                    order_id,
                    "Exit cancelled - unresolved, forcing done"
                );
                self.state = TradeState::Done;
            }
            _ => self.state = TradeState::Search,
        }
    }

    /// One shot: force-cancel all live orders.
    pub async fn handle_cancel(&mut self) {
        self.state = TradeState::EndOfDayCancel;
        for order_id in [
            self.pending.as_ref().map(|p| p.order.id),
            self.flatten.as_ref().map(|p| p.order.id),
        ]
        .into_iter()
        .flatten()
        {
            if let Err(e) = self.execution.cancel_order(order_id).await {
                warn!(order_id, error = %e, "Cancel request failed");
            }
        }
    }

    /// One shot: flatten the position with a market close. Skipped in
    /// `NoTrade`.
    pub async fn handle_go_neutral(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.state == TradeState::NoTrade {
            return Ok(());
        }
        self.state = TradeState::EndOfDayNeutral;
        if !self.position.is_active() {
            return Ok(());
        }
        if self.flatten.is_some() {
            return Err(TradeError::SlotOccupied("flatten").into());
        }
        let size = self.position.active_size();
        let side = if size > Decimal::ZERO { OrderSide::Sell } else { OrderSide::Buy };
        let order = self.execution.construct_order(
            self.position.instrument(),
            OrderType::Market,
            side,
            size.abs(),
        );
        self.chart.add_label(
            self.tree,
            at,
            self.position.last_quote().map(|q| q.midpoint()).unwrap_or_default(),
            &format!("Neutral Submit {}", order.id),
        );
        let events = self.execution.subscribe_order_events(order.id);
        self.execution.place_order(&order).await?;
        self.flatten = Some(PendingOrder { order, events });
        Ok(())
    }
}
