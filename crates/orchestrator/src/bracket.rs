//! Bracket entry: an entry order with optional protective stop and/or
//! profit target.
//!
//! Both exits are constructed up front and placed when the entry fills;
//! filling either cancels the other. A trailing stop ratchets monotonically
//! in the favorable direction off the quote midpoint and only touches the
//! live order when the improvement exceeds the configured dead band.

use std::sync::Arc;
use std::task::Poll;

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use basket_trade_core::chart::{ChartSink, TreeId};
use basket_trade_core::config::BracketConfig;
use basket_trade_core::events::{OrderEvent, Quote};
use basket_trade_core::order::{Order, OrderSide, OrderStatus, OrderType};
use basket_trade_core::position::Position;
use basket_trade_core::subscription::Subscription;
use basket_trade_core::traits::ExecutionProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketState {
    InitializeEntry,
    EnteringPosition,
    EnteredPosition,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketSlot {
    Entry,
    Profit,
    Stop,
}

/// How the entry order is priced.
#[derive(Debug, Clone, Copy)]
pub enum EntryMethod {
    Market,
    Limit(Decimal),
}

/// How the profit target is priced.
#[derive(Debug, Clone, Copy)]
pub enum ProfitMethod {
    Absolute(Decimal),
    /// Offset from the quote midpoint at submission.
    Relative(Decimal),
}

/// How the protective stop is priced.
#[derive(Debug, Clone, Copy)]
pub enum StopMethod {
    Stop(Decimal),
    /// Trailing by a fixed offset from the midpoint.
    TrailingAbsolute(Decimal),
}

/// Order selection for one bracket trade.
#[derive(Debug, Clone, Copy)]
pub struct BracketSpec {
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry: EntryMethod,
    pub profit: Option<ProfitMethod>,
    pub stop: Option<StopMethod>,
}

struct TrackedOrder {
    order: Order,
    events: Subscription<OrderEvent>,
}

pub struct BracketEntry {
    state: BracketState,
    position: Arc<Position>,
    execution: Arc<dyn ExecutionProvider>,
    chart: Arc<dyn ChartSink>,
    tree: TreeId,
    side: OrderSide,
    entry: Option<TrackedOrder>,
    profit: Option<TrackedOrder>,
    stop: Option<TrackedOrder>,
    trail_delta: Decimal,
    stop_current: Decimal,
    watch_stop: bool,
    dead_band: Decimal,
    last_quote: Option<Quote>,
}

impl BracketEntry {
    /// Construct the bracket's orders and place the entry. The stop and
    /// profit orders stay in `Created` status until the entry fills.
    pub async fn submit(
        position: Arc<Position>,
        execution: Arc<dyn ExecutionProvider>,
        chart: Arc<dyn ChartSink>,
        tree: TreeId,
        config: &BracketConfig,
        spec: BracketSpec,
    ) -> Result<Self> {
        let quote = position.last_quote();
        let mid = quote.map(|q| q.midpoint()).unwrap_or_default();
        let at = quote.map(|q| q.timestamp).unwrap_or_else(Utc::now);
        let instrument = position.instrument().clone();

        let normalize = |price: Decimal| {
            let interval = execution.min_tick_increment(&instrument, price);
            if interval.is_zero() {
                price
            } else {
                (price / interval).round() * interval
            }
        };

        let entry_tag = match spec.side {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        };

        let entry_order = match spec.entry {
            EntryMethod::Market => {
                let order = execution.construct_order(
                    &instrument,
                    OrderType::Market,
                    spec.side,
                    spec.quantity,
                );
                chart.add_label(tree, at, mid, &format!("{entry_tag} Submit {}", order.id));
                order
            }
            EntryMethod::Limit(price) => {
                let price = normalize(price);
                let order = execution.construct_order(
                    &instrument,
                    OrderType::Limit { price },
                    spec.side,
                    spec.quantity,
                );
                chart.add_label(tree, at, price, &format!("{entry_tag} Submit {}", order.id));
                order
            }
        };

        let exit_side = spec.side.opposite();

        let profit_order = spec.profit.map(|method| {
            let price = match method {
                ProfitMethod::Absolute(price) => normalize(price),
                ProfitMethod::Relative(offset) => match spec.side {
                    OrderSide::Buy => normalize(mid + offset),
                    OrderSide::Sell => normalize(mid - offset),
                },
            };
            execution.construct_order(
                &instrument,
                OrderType::Limit { price },
                exit_side,
                spec.quantity,
            )
        });

        let mut trail_delta = Decimal::ZERO;
        let mut stop_current = Decimal::ZERO;
        let stop_order = spec.stop.map(|method| {
            let trigger = match method {
                StopMethod::Stop(price) => normalize(price),
                StopMethod::TrailingAbsolute(delta) => {
                    trail_delta = delta;
                    match spec.side {
                        OrderSide::Buy => normalize(mid - delta),
                        OrderSide::Sell => normalize(mid + delta),
                    }
                }
            };
            stop_current = trigger;
            execution.construct_order(
                &instrument,
                OrderType::Stop { trigger },
                exit_side,
                spec.quantity,
            )
        });

        let mut entry = TrackedOrder {
            events: execution.subscribe_order_events(entry_order.id),
            order: entry_order,
        };
        let profit = profit_order.map(|order| TrackedOrder {
            events: execution.subscribe_order_events(order.id),
            order,
        });
        let stop = stop_order.map(|order| TrackedOrder {
            events: execution.subscribe_order_events(order.id),
            order,
        });

        execution.place_order(&entry.order).await?;
        entry.order.status = OrderStatus::Submitted;
        info!(
            instrument = %instrument.name,
            order_id = entry.order.id,
            "Bracket entry order placed"
        );

        Ok(Self {
            state: BracketState::EnteringPosition,
            position,
            execution,
            chart,
            tree,
            side: spec.side,
            entry: Some(entry),
            profit,
            stop,
            trail_delta,
            stop_current,
            watch_stop: false,
            dead_band: config.trail_dead_band,
            last_quote: quote,
        })
    }

    pub fn state(&self) -> BracketState {
        self.state
    }

    pub fn stop_price(&self) -> Decimal {
        self.stop_current
    }

    fn normalize(&self, price: Decimal) -> Decimal {
        let interval = self
            .execution
            .min_tick_increment(self.position.instrument(), price);
        if interval.is_zero() {
            price
        } else {
            (price / interval).round() * interval
        }
    }

    /// Quote tick: ratchet the trailing stop. A new stop price applies only
    /// if it strictly improves on the current one by more than the dead
    /// band, so the stop never loosens and quiet drift never touches the
    /// live order.
    pub async fn handle_quote(&mut self, quote: Quote) -> Result<()> {
        self.last_quote = Some(quote);
        if !self.watch_stop {
            return Ok(());
        }
        let mid = quote.midpoint();
        let candidate = self.normalize(match self.side {
            OrderSide::Buy => mid - self.trail_delta,
            OrderSide::Sell => mid + self.trail_delta,
        });
        let improvement = match self.side {
            OrderSide::Buy => candidate - self.stop_current,
            OrderSide::Sell => self.stop_current - candidate,
        };
        if improvement <= self.dead_band.max(Decimal::ZERO) {
            return Ok(());
        }
        let updated = match self.stop.as_mut() {
            Some(stop) => {
                stop.order.set_price(candidate);
                Some(stop.order.clone())
            }
            None => None,
        };
        if let Some(order) = updated {
            self.stop_current = candidate;
            self.execution.update_order(&order).await?;
            self.chart.add_label(
                self.tree,
                quote.timestamp,
                candidate,
                &format!("Stop Update {}", order.id),
            );
        }
        Ok(())
    }

    /// Await the next event across the bracket's live orders.
    pub async fn next_event(&mut self) -> Option<(BracketSlot, OrderEvent)> {
        std::future::poll_fn(|cx| {
            for (slot, tracked) in [
                (BracketSlot::Entry, self.entry.as_mut()),
                (BracketSlot::Profit, self.profit.as_mut()),
                (BracketSlot::Stop, self.stop.as_mut()),
            ] {
                if let Some(tracked) = tracked {
                    if let Poll::Ready(Some(event)) = tracked.events.poll_recv(cx) {
                        return Poll::Ready(Some((slot, event)));
                    }
                }
            }
            Poll::Pending
        })
        .await
    }

    pub async fn handle_event(&mut self, slot: BracketSlot, event: OrderEvent) -> Result<()> {
        match (slot, event) {
            (BracketSlot::Entry, OrderEvent::Filled { avg_price, quantity, commission, timestamp, .. }) => {
                self.position
                    .apply_fill(self.side, quantity, avg_price, commission);
                self.chart.add_label(
                    self.tree,
                    timestamp,
                    avg_price,
                    match self.side {
                        OrderSide::Buy => "Buy Fill",
                        OrderSide::Sell => "Sell Fill",
                    },
                );
                if let Some(stop) = self.stop.as_mut() {
                    self.execution.place_order(&stop.order).await?;
                    stop.order.status = OrderStatus::Submitted;
                    if self.trail_delta > Decimal::ZERO {
                        self.watch_stop = true;
                    }
                    self.chart.add_label(
                        self.tree,
                        timestamp,
                        stop.order.price().unwrap_or_default(),
                        &format!("Stop Submit {}", stop.order.id),
                    );
                }
                if let Some(profit) = self.profit.as_mut() {
                    self.execution.place_order(&profit.order).await?;
                    profit.order.status = OrderStatus::Submitted;
                    self.chart.add_label(
                        self.tree,
                        timestamp,
                        profit.order.price().unwrap_or_default(),
                        &format!("Profit Submit {}", profit.order.id),
                    );
                }
                self.entry = None;
                self.state = BracketState::EnteredPosition;
            }
            (BracketSlot::Entry, OrderEvent::Cancelled { order_id, .. }) => {
                info!(order_id, "Bracket entry cancelled");
                self.watch_stop = false;
                self.entry = None;
                self.state = BracketState::Done;
            }
            (BracketSlot::Profit, OrderEvent::Filled { avg_price, quantity, commission, timestamp, .. }) => {
                self.position
                    .apply_fill(self.side.opposite(), quantity, avg_price, commission);
                self.chart
                    .add_label(self.tree, timestamp, avg_price, "Profit Fill");
                self.profit = None;
                // one-cancels-other
                if let Some(stop) = self.stop.take() {
                    self.cancel_if_live(&stop.order).await;
                }
                self.watch_stop = false;
                self.state = BracketState::Done;
            }
            (BracketSlot::Stop, OrderEvent::Filled { avg_price, quantity, commission, timestamp, .. }) => {
                self.position
                    .apply_fill(self.side.opposite(), quantity, avg_price, commission);
                self.chart
                    .add_label(self.tree, timestamp, avg_price, "Stop Fill");
                self.stop = None;
                self.watch_stop = false;
                if let Some(profit) = self.profit.take() {
                    self.cancel_if_live(&profit.order).await;
                }
                self.state = BracketState::Done;
            }
            (BracketSlot::Profit, OrderEvent::Cancelled { order_id, .. }) => {
                info!(order_id, "Bracket profit order cancelled");
                self.profit = None;
            }
            (BracketSlot::Stop, OrderEvent::Cancelled { order_id, .. }) => {
                info!(order_id, "Bracket stop order cancelled");
                self.watch_stop = false;
                self.stop = None;
            }
        }
        Ok(())
    }

    async fn cancel_if_live(&self, order: &Order) {
        if order.status == OrderStatus::Created {
            return;
        }
        if let Err(e) = self.execution.cancel_order(order.id).await {
            warn!(order_id = order.id, error = %e, "Bracket cancel failed");
        }
    }

    /// Sweep every order with remaining quantity; writes a consolidated
    /// cancel label when anything was live.
    pub async fn cancel(&mut self) {
        let mut cancelled = Vec::new();
        for tracked in [self.profit.as_ref(), self.entry.as_ref(), self.stop.as_ref()]
            .into_iter()
            .flatten()
        {
            if tracked.order.status == OrderStatus::Created {
                continue;
            }
            if tracked.order.remaining > Decimal::ZERO {
                if let Err(e) = self.execution.cancel_order(tracked.order.id).await {
                    warn!(order_id = tracked.order.id, error = %e, "Cancel failed");
                    continue;
                }
                cancelled.push(tracked.order.id.to_string());
            }
        }
        if cancelled.is_empty() {
            info!("Bracket cancel - nothing cancelled");
        } else if let Some(quote) = self.last_quote {
            self.chart.add_label(
                self.tree,
                quote.timestamp,
                quote.midpoint(),
                &format!("Cancelled: {}", cancelled.join(" ")),
            );
        }
    }

    /// Log remaining vs ordered quantities per slot.
    pub fn emit_status(&self) {
        let describe = |tracked: &Option<TrackedOrder>| {
            tracked.as_ref().map(|t| {
                if t.order.status == OrderStatus::Created {
                    format!("order {} not yet submitted", t.order.id)
                } else {
                    format!(
                        "order {} has {} remaining of {} ordered",
                        t.order.id, t.order.remaining, t.order.quantity
                    )
                }
            })
        };
        info!(
            entry = ?describe(&self.entry),
            profit = ?describe(&self.profit),
            stop = ?describe(&self.stop),
            "Bracket status"
        );
    }
}
