//! Strategy instance: one traded unit (underlying leg or multi-leg option
//! combo), its collaborator hook bundle, and the actor that drives it.

use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{error, info, warn};

use basket_trade_core::chart::{ChartSink, TreeId};
use basket_trade_core::config::RollConfig;
use basket_trade_core::events::{Quote, Trade};
use basket_trade_core::instrument::Instrument;
use basket_trade_core::order::{Order, OrderSide, OrderType};
use basket_trade_core::pivots::PivotSet;
use basket_trade_core::portfolio::{PortfolioId, PortfolioRecord};
use basket_trade_core::position::{Position, PositionStats};
use basket_trade_core::subscription::Subscription;
use basket_trade_core::traits::{ExecutionProvider, MarketData};
use basket_trade_core::watch::Watch;

use basket_trade_options::aggregate::Aggregate;
use basket_trade_options::tracker::{RollHost, Tracker};

use crate::track_order::{OrderArgs, TrackOrder, TradeState};

/// The collaborator hook bundle, passed once at construction in place of
/// per-closure wiring: construction/reuse of options, positions, and
/// portfolios; pricing-engine registration; Greeks pairing; and the three
/// authorization gates.
#[async_trait]
pub trait StrategyHost: Send + Sync {
    async fn construct_option(&self, symbol: &str) -> Result<Watch>;
    /// Find-or-create the position for an instrument under a portfolio.
    async fn construct_position(
        &self,
        portfolio: &PortfolioId,
        watch: &Watch,
        notes: &str,
    ) -> Result<Arc<Position>>;
    /// Find-or-create a combo portfolio; first-time construction promotes
    /// the owning strategy from in-waiting to active.
    async fn construct_portfolio(
        &self,
        id: &PortfolioId,
        owner: &PortfolioId,
    ) -> Result<PortfolioRecord>;
    fn register_watch(&self, instrument: &Instrument);
    fn register_option(&self, instrument: &Instrument);
    fn start_greeks(&self, option: &Instrument, underlying: &Instrument);
    fn stop_greeks(&self, option: &Instrument, underlying: &Instrument);
    async fn authorize_underlying(
        &self,
        order: &Order,
        position: &Position,
        portfolio: &PortfolioRecord,
    ) -> bool;
    async fn authorize_option(
        &self,
        order: &Order,
        position: &Position,
        portfolio: &PortfolioRecord,
        instrument: &Instrument,
    ) -> bool;
    async fn authorize_simple(&self, portfolio: &PortfolioId, name: &str, exists: bool) -> bool;
}

/// Commands accepted by a running strategy actor. One-shot handlers are
/// serialized through this channel alongside quote/order processing.
pub enum StrategyCommand {
    ClosePositions,
    CloseForProfits,
    TakeProfits,
    SaveSeries(String),
    EmitInfo(oneshot::Sender<PositionStats>),
    HandleCancel,
    HandleGoNeutral,
    TestItmRoll(NaiveDate),
    Shutdown,
}

/// Cloneable handle to a strategy actor.
#[derive(Clone)]
pub struct StrategyHandle {
    combo_id: PortfolioId,
    tx: mpsc::Sender<StrategyCommand>,
}

impl StrategyHandle {
    pub fn combo_id(&self) -> &PortfolioId {
        &self.combo_id
    }

    pub async fn send(&self, command: StrategyCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("strategy {} is gone", self.combo_id))
    }

    pub async fn emit_info(&self) -> Result<PositionStats> {
        let (tx, rx) = oneshot::channel();
        self.send(StrategyCommand::EmitInfo(tx)).await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(StrategyCommand::Shutdown).await
    }
}

/// Exponentially-smoothed midpoint slope, the "rising/falling" input to the
/// roll trackers and the entry signal.
#[derive(Debug, Default)]
struct SlopeEstimator {
    last: Option<Decimal>,
    slope: Decimal,
}

impl SlopeEstimator {
    fn update(&mut self, mid: Decimal) -> Decimal {
        if let Some(last) = self.last {
            let delta = mid - last;
            // EMA with alpha 0.25
            self.slope = self.slope * Decimal::new(75, 2) + delta * Decimal::new(25, 2);
        }
        self.last = Some(mid);
        self.slope
    }

    fn slope(&self) -> Decimal {
        self.slope
    }
}

/// One option leg with its quote feed.
struct Leg {
    position: Arc<Position>,
    quotes: Subscription<Quote>,
}

/// Events surfaced from the instance's internal subscriptions.
pub enum InstanceEvent {
    Order(basket_trade_core::events::OrderEvent),
    LegQuote(usize, Quote),
    CandidateQuote(usize, Quote),
}

/// Construction parameters for a strategy instance.
pub struct StrategyParams {
    pub underlying: Watch,
    pub market: Arc<dyn MarketData>,
    pub execution: Arc<dyn ExecutionProvider>,
    pub chart: Arc<dyn ChartSink>,
    pub tree: TreeId,
    pub aggregate_id: PortfolioId,
    pub combo_id: PortfolioId,
    pub pivots: PivotSet,
    pub chains: Arc<RwLock<Aggregate>>,
    pub host: Arc<dyn StrategyHost>,
    pub roll_host: Arc<dyn RollHost>,
    pub order_size: Decimal,
    pub roll: RollConfig,
}

pub struct StrategyInstance {
    underlying: Watch,
    market: Arc<dyn MarketData>,
    execution: Arc<dyn ExecutionProvider>,
    chart: Arc<dyn ChartSink>,
    tree: TreeId,
    aggregate_id: PortfolioId,
    combo_id: PortfolioId,
    pivots: PivotSet,
    chains: Arc<RwLock<Aggregate>>,
    host: Arc<dyn StrategyHost>,
    roll_host: Arc<dyn RollHost>,
    order_size: Decimal,
    roll: RollConfig,
    slope: SlopeEstimator,
    track: Option<TrackOrder>,
    trackers: Vec<Tracker>,
    legs: Vec<Leg>,
    /// Authorized and chart-activated; set at most once.
    activated: bool,
    /// Re-attached to persisted positions; the entry signal is skipped.
    reused: bool,
}

impl StrategyInstance {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            underlying: params.underlying,
            market: params.market,
            execution: params.execution,
            chart: params.chart,
            tree: params.tree,
            aggregate_id: params.aggregate_id,
            combo_id: params.combo_id,
            pivots: params.pivots,
            chains: params.chains,
            host: params.host,
            roll_host: params.roll_host,
            order_size: params.order_size,
            roll: params.roll,
            slope: SlopeEstimator::default(),
            track: None,
            trackers: Vec::new(),
            legs: Vec::new(),
            activated: false,
            reused: false,
        }
    }

    pub fn combo_id(&self) -> &PortfolioId {
        &self.combo_id
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn entry_state(&self) -> Option<TradeState> {
        self.track.as_ref().map(TrackOrder::state)
    }

    /// Re-attach a persisted position. Option legs get a roll tracker and a
    /// quote feed; the strategy skips the entry signal and resumes tracking
    /// the existing legs.
    pub fn add_position(&mut self, position: Arc<Position>) {
        self.reused = true;
        self.activated = true;
        let instrument = position.instrument().clone();
        if instrument.is_option() {
            self.host.register_option(&instrument);
            self.host.start_greeks(&instrument, self.underlying.instrument());
            let Some(expiry) = instrument.expiry() else {
                warn!(name = %instrument.name, "Option leg without expiry; not tracked");
                return;
            };
            let mut tracker = Tracker::new(
                self.roll.clone(),
                Arc::clone(&self.chains),
                expiry,
                Arc::clone(&self.roll_host),
            );
            if let Err(e) = tracker.initialize(Arc::clone(&position)) {
                warn!(name = %instrument.name, error = %e, "Roll tracker rejected leg");
                return;
            }
            self.trackers.push(tracker);
            self.refresh_legs();
        } else {
            // an underlying leg resumes through the order tracker
            let track = TrackOrder::new(
                Arc::clone(&position),
                Arc::clone(&self.execution),
                Arc::clone(&self.chart),
                self.tree,
                self.order_size,
            );
            self.track = Some(track);
        }
    }

    /// Keep the leg quote feeds aligned with the tracker-held positions;
    /// rolls swap the tracked instrument.
    fn refresh_legs(&mut self) {
        let current: Vec<Arc<Position>> = self
            .trackers
            .iter()
            .filter_map(Tracker::position)
            .collect();
        self.legs.retain(|leg| {
            current
                .iter()
                .any(|p| p.instrument().name == leg.position.instrument().name)
        });
        for position in current {
            let name = position.instrument().name.clone();
            if !self.legs.iter().any(|l| l.position.instrument().name == name) {
                self.legs.push(Leg {
                    quotes: self.market.subscribe_quotes(&name),
                    position,
                });
            }
        }
    }

    /// Underlying trade print: evaluate the entry signal once and enter.
    pub async fn handle_trade(&mut self, trade: Trade) -> Result<()> {
        if self.reused || self.track.is_some() {
            return Ok(());
        }
        let slope = self.slope.slope();
        let side = if trade.price > self.pivots.pv && slope >= Decimal::ZERO {
            OrderSide::Buy
        } else if trade.price < self.pivots.pv && slope < Decimal::ZERO {
            OrderSide::Sell
        } else {
            return Ok(());
        };
        self.enter(side, trade).await
    }

    /// First qualifying signal: construct or reuse the instrument, position,
    /// and portfolio, register with the pricing engine, then authorize.
    /// Denial keeps the constructed records (they are reusable cache
    /// entries) but submits nothing and does not activate.
    async fn enter(&mut self, side: OrderSide, trade: Trade) -> Result<()> {
        let watch = self.underlying.clone();
        let position = self
            .host
            .construct_position(&self.combo_id, &watch, "basket entry")
            .await?;
        let exists = position.is_active();
        let portfolio = self
            .host
            .construct_portfolio(&self.combo_id, &self.aggregate_id)
            .await?;
        self.host.register_watch(watch.instrument());

        let mut track = TrackOrder::new(
            Arc::clone(&position),
            Arc::clone(&self.execution),
            Arc::clone(&self.chart),
            self.tree,
            self.order_size,
        );
        let order = track.prepare(OrderType::Market, side);
        if !self
            .host
            .authorize_underlying(&order, &position, &portfolio)
            .await
        {
            info!(combo = %self.combo_id, "Underlying authorization denied");
            return Ok(());
        }
        let authorized = self
            .host
            .authorize_simple(&self.combo_id, watch.name(), exists)
            .await;
        if !authorized && !exists {
            info!(combo = %self.combo_id, "Authorization denied; no order submitted");
            return Ok(());
        }

        self.activated = true;
        track
            .submit_entry(order, &OrderArgs::market(trade.timestamp, trade.price))
            .await?;
        self.track = Some(track);
        Ok(())
    }

    /// Underlying quote: feed the slope estimator, the entry position, and
    /// the roll trackers.
    pub async fn handle_quote(&mut self, quote: Quote) -> Result<()> {
        let mid = quote.midpoint();
        let slope = self.slope.update(mid);
        if let Some(track) = self.track.as_ref() {
            track.position().update_quote(quote);
        }
        let mut rolled = false;
        for tracker in &mut self.trackers {
            let Some(position) = tracker.position() else { continue };
            if position.active_size() >= Decimal::ZERO {
                tracker.test_long(slope, mid).await;
            } else {
                tracker.test_short(slope, mid).await?;
            }
            rolled = true;
        }
        if rolled {
            self.refresh_legs();
        }
        Ok(())
    }

    /// Poll the instance-internal event sources (order events, leg quotes,
    /// roll candidates) as one future.
    pub fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<InstanceEvent> {
        if let Some(track) = self.track.as_mut() {
            if let Poll::Ready(Some(event)) = track.poll_order_event(cx) {
                return Poll::Ready(InstanceEvent::Order(event));
            }
        }
        for (i, leg) in self.legs.iter_mut().enumerate() {
            if let Poll::Ready(Some(quote)) = leg.quotes.poll_recv(cx) {
                return Poll::Ready(InstanceEvent::LegQuote(i, quote));
            }
        }
        for (i, tracker) in self.trackers.iter_mut().enumerate() {
            if let Poll::Ready(Some(quote)) = tracker.poll_candidate_quote(cx) {
                return Poll::Ready(InstanceEvent::CandidateQuote(i, quote));
            }
        }
        Poll::Pending
    }

    pub async fn next_event(&mut self) -> InstanceEvent {
        std::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    pub async fn handle_event(&mut self, event: InstanceEvent) -> Result<()> {
        match event {
            InstanceEvent::Order(event) => {
                if let Some(track) = self.track.as_mut() {
                    track.handle_order_event(event);
                }
            }
            InstanceEvent::LegQuote(i, quote) => {
                if let Some(leg) = self.legs.get(i) {
                    leg.position.update_quote(quote);
                }
            }
            InstanceEvent::CandidateQuote(i, quote) => {
                if let Some(tracker) = self.trackers.get_mut(i) {
                    tracker.handle_candidate_quote(quote).await?;
                    self.refresh_legs();
                }
            }
        }
        Ok(())
    }

    /// Aggregate statistics across the entry position and all tracked legs.
    pub fn net_stats(&self) -> PositionStats {
        let mut total = PositionStats::default();
        let mut fold = |stats: PositionStats| {
            total.unrealized += stats.unrealized;
            total.realized += stats.realized;
            total.commission += stats.commission;
        };
        if let Some(track) = self.track.as_ref() {
            fold(track.query_stats());
        }
        for tracker in &self.trackers {
            if let Some(position) = tracker.position() {
                fold(position.stats());
            }
        }
        total
    }

    async fn close_positions(&mut self) -> Result<()> {
        if let Some(track) = self.track.as_mut() {
            track.handle_go_neutral(Utc::now()).await?;
        }
        for tracker in &mut self.trackers {
            tracker.quiesce();
            if let Some(position) = tracker.position() {
                if position.is_active() {
                    self.roll_host.close_leg(position).await?;
                }
            }
        }
        Ok(())
    }

    async fn take_profits(&mut self) -> Result<()> {
        if let Some(track) = self.track.as_mut() {
            let stats = track.query_stats();
            if stats.unrealized > Decimal::ZERO && track.state() == TradeState::ExitSignal {
                let quote = track.position().last_quote();
                let mid = quote.map(|q| q.midpoint()).unwrap_or_default();
                let size = track.position().active_size();
                let args = OrderArgs::market(Utc::now(), mid);
                if size > Decimal::ZERO {
                    track.exit_long_market(args).await?;
                } else {
                    track.exit_short_market(args).await?;
                }
            }
        }
        for tracker in &mut self.trackers {
            if let Some(position) = tracker.position() {
                if position.is_active() && position.unrealized_pnl() > Decimal::ZERO {
                    self.roll_host.close_leg(position).await?;
                }
            }
        }
        Ok(())
    }

    /// Returns `false` when the actor should stop.
    pub async fn handle_command(&mut self, command: StrategyCommand) -> Result<bool> {
        match command {
            StrategyCommand::ClosePositions => self.close_positions().await?,
            StrategyCommand::CloseForProfits => {
                if self.net_stats().net() > Decimal::ZERO {
                    self.close_positions().await?;
                }
            }
            StrategyCommand::TakeProfits => self.take_profits().await?,
            StrategyCommand::SaveSeries(path) => self.chart.save(&path),
            StrategyCommand::EmitInfo(reply) => {
                let stats = self.net_stats();
                info!(
                    combo = %self.combo_id,
                    unrealized = %stats.unrealized,
                    realized = %stats.realized,
                    commission = %stats.commission,
                    "Strategy info"
                );
                let _ = reply.send(stats);
            }
            StrategyCommand::HandleCancel => {
                if let Some(track) = self.track.as_mut() {
                    track.handle_cancel().await;
                }
                for tracker in &mut self.trackers {
                    tracker.quiesce();
                }
            }
            StrategyCommand::HandleGoNeutral => {
                if let Some(track) = self.track.as_mut() {
                    track.handle_go_neutral(Utc::now()).await?;
                }
                for tracker in &mut self.trackers {
                    tracker.quiesce();
                }
            }
            StrategyCommand::TestItmRoll(date) => {
                for tracker in &mut self.trackers {
                    tracker.test_itm_roll(date).await?;
                }
                self.refresh_legs();
            }
            StrategyCommand::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    pub fn shutdown(&mut self) {
        for tracker in &mut self.trackers {
            if let Some(position) = tracker.position() {
                self.host
                    .stop_greeks(position.instrument(), self.underlying.instrument());
            }
            tracker.shutdown();
        }
        self.legs.clear();
        self.track = None;
    }
}

/// Actor wrapping a strategy instance: serializes commands, market events,
/// and order events through one loop.
pub struct StrategyActor {
    instance: StrategyInstance,
    rx: mpsc::Receiver<StrategyCommand>,
    quotes: Subscription<Quote>,
    trades: Subscription<Trade>,
}

impl StrategyActor {
    /// Build the actor and its handle; the caller decides when to spawn.
    pub fn new(instance: StrategyInstance) -> (Self, StrategyHandle) {
        let (tx, rx) = mpsc::channel(32);
        let quotes = instance.underlying.subscribe_quotes();
        let trades = instance.underlying.subscribe_trades();
        let handle = StrategyHandle {
            combo_id: instance.combo_id.clone(),
            tx,
        };
        (Self { instance, rx, quotes, trades }, handle)
    }

    /// Pre-spawn access for re-attaching persisted positions.
    pub fn instance_mut(&mut self) -> &mut StrategyInstance {
        &mut self.instance
    }

    pub async fn run(mut self) -> Result<()> {
        info!(combo = %self.instance.combo_id, "Strategy running");
        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        None => break,
                        Some(command) => {
                            match self.instance.handle_command(command).await {
                                Ok(true) => {}
                                Ok(false) => break,
                                Err(e) => error!(combo = %self.instance.combo_id, error = %e, "Command failed"),
                            }
                        }
                    }
                }
                Some(quote) = self.quotes.recv() => {
                    if let Err(e) = self.instance.handle_quote(quote).await {
                        warn!(combo = %self.instance.combo_id, error = %e, "Quote handling failed");
                    }
                }
                Some(trade) = self.trades.recv() => {
                    if let Err(e) = self.instance.handle_trade(trade).await {
                        warn!(combo = %self.instance.combo_id, error = %e, "Trade handling failed");
                    }
                }
                event = self.instance.next_event() => {
                    if let Err(e) = self.instance.handle_event(event).await {
                        warn!(combo = %self.instance.combo_id, error = %e, "Event handling failed");
                    }
                }
            }
        }
        self.instance.shutdown();
        info!(combo = %self.instance.combo_id, "Strategy stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use basket_trade_core::chart::ChartBuffer;
    use basket_trade_core::position::PositionRecord;
    use basket_trade_provider::SimProvider;

    struct RecordingHost {
        sim: Arc<SimProvider>,
        authorize: AtomicBool,
        constructed_positions: Mutex<Vec<String>>,
        constructed_portfolios: Mutex<Vec<String>>,
        positions: Mutex<std::collections::HashMap<String, Arc<Position>>>,
    }

    impl RecordingHost {
        fn new(sim: Arc<SimProvider>) -> Self {
            Self {
                sim,
                authorize: AtomicBool::new(true),
                constructed_positions: Mutex::new(Vec::new()),
                constructed_portfolios: Mutex::new(Vec::new()),
                positions: Mutex::new(std::collections::HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl StrategyHost for RecordingHost {
        async fn construct_option(&self, symbol: &str) -> Result<Watch> {
            let instrument = self.sim.resolve_instrument(symbol).await?;
            Ok(Watch::new(instrument, Arc::clone(&self.sim) as Arc<dyn MarketData>))
        }

        async fn construct_position(
            &self,
            portfolio: &PortfolioId,
            watch: &Watch,
            _notes: &str,
        ) -> Result<Arc<Position>> {
            let mut positions = self.positions.lock().unwrap();
            if let Some(existing) = positions.get(watch.name()) {
                return Ok(Arc::clone(existing));
            }
            self.constructed_positions.lock().unwrap().push(watch.name().to_string());
            let position = Arc::new(Position::new(
                PositionRecord::new(portfolio.clone(), watch.name()),
                watch.instrument().clone(),
            ));
            positions.insert(watch.name().to_string(), Arc::clone(&position));
            Ok(position)
        }

        async fn construct_portfolio(
            &self,
            id: &PortfolioId,
            owner: &PortfolioId,
        ) -> Result<PortfolioRecord> {
            self.constructed_portfolios.lock().unwrap().push(id.clone());
            Ok(PortfolioRecord::new(
                id.clone(),
                Some(owner.clone()),
                basket_trade_core::PortfolioKind::MultiLeggedPosition,
                "Combo",
            ))
        }

        fn register_watch(&self, _instrument: &Instrument) {}
        fn register_option(&self, _instrument: &Instrument) {}
        fn start_greeks(&self, _option: &Instrument, _underlying: &Instrument) {}
        fn stop_greeks(&self, _option: &Instrument, _underlying: &Instrument) {}

        async fn authorize_underlying(
            &self,
            _order: &Order,
            _position: &Position,
            _portfolio: &PortfolioRecord,
        ) -> bool {
            true
        }

        async fn authorize_option(
            &self,
            _order: &Order,
            _position: &Position,
            _portfolio: &PortfolioRecord,
            _instrument: &Instrument,
        ) -> bool {
            true
        }

        async fn authorize_simple(&self, _portfolio: &PortfolioId, _name: &str, _exists: bool) -> bool {
            self.authorize.load(Ordering::SeqCst)
        }
    }

    struct NullRollHost;

    #[async_trait]
    impl RollHost for NullRollHost {
        async fn construct_option(&self, _symbol: &str) -> Result<Watch> {
            anyhow::bail!("not used")
        }
        async fn close_leg(&self, _position: Arc<Position>) -> Result<()> {
            Ok(())
        }
        async fn open_leg(&self, _option: Watch, _notes: &str) -> Result<Arc<Position>> {
            anyhow::bail!("not used")
        }
    }

    struct Fixture {
        instance: StrategyInstance,
        sim: Arc<SimProvider>,
        host: Arc<RecordingHost>,
    }

    async fn fixture() -> Fixture {
        let sim = Arc::new(SimProvider::new());
        sim.register_equity("XYZ");
        let instrument = sim.resolve_instrument("XYZ").await.unwrap();
        let underlying = Watch::new(instrument, Arc::clone(&sim) as Arc<dyn MarketData>);
        let chart = Arc::new(ChartBuffer::new());
        let tree = chart.chart_root("XYZ");
        let host = Arc::new(RecordingHost::new(Arc::clone(&sim)));
        let chains = Arc::new(RwLock::new(Aggregate::new(underlying.clone())));

        let pivots = PivotSet {
            r2: dec!(110),
            r1: dec!(105),
            pv: dec!(100),
            s1: dec!(95),
            s2: dec!(90),
        };
        let instance = StrategyInstance::new(StrategyParams {
            underlying,
            market: Arc::clone(&sim) as Arc<dyn MarketData>,
            execution: Arc::clone(&sim) as Arc<dyn ExecutionProvider>,
            chart: chart as Arc<dyn ChartSink>,
            tree,
            aggregate_id: "portfolio-XYZ".to_string(),
            combo_id: "combo-XYZ".to_string(),
            pivots,
            chains,
            host: Arc::clone(&host) as Arc<dyn StrategyHost>,
            roll_host: Arc::new(NullRollHost) as Arc<dyn RollHost>,
            order_size: dec!(100),
            roll: RollConfig::default(),
        });
        Fixture { instance, sim, host }
    }

    fn trade(price: Decimal) -> Trade {
        Trade { price, size: dec!(100), timestamp: Utc::now() }
    }

    #[tokio::test]
    async fn first_qualifying_signal_submits_exactly_one_entry() {
        let mut f = fixture().await;

        // below the pivot with flat slope: long signal requires price > pv
        f.instance.handle_trade(trade(dec!(99.00))).await.unwrap();
        assert!(f.sim.submitted_orders().is_empty());

        f.instance.handle_trade(trade(dec!(101.00))).await.unwrap();
        assert_eq!(f.instance.entry_state(), Some(TradeState::EntrySubmitted));
        assert_eq!(f.sim.submitted_orders().len(), 1);
        assert!(f.instance.is_activated());

        // a second qualifying print does not duplicate the entry
        f.instance.handle_trade(trade(dec!(102.00))).await.unwrap();
        assert_eq!(f.sim.submitted_orders().len(), 1);
        assert_eq!(f.host.constructed_positions.lock().unwrap().len(), 1);
        assert_eq!(f.host.constructed_portfolios.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn authorization_denial_keeps_records_but_submits_nothing() {
        let mut f = fixture().await;
        f.host.authorize.store(false, Ordering::SeqCst);

        f.instance.handle_trade(trade(dec!(101.00))).await.unwrap();

        assert!(f.sim.submitted_orders().is_empty());
        assert!(!f.instance.is_activated());
        // constructed records stay cached for reuse
        assert_eq!(f.host.constructed_positions.lock().unwrap().len(), 1);
        assert_eq!(f.host.constructed_portfolios.lock().unwrap().len(), 1);

        // re-authorization succeeds later without reconstructing
        f.host.authorize.store(true, Ordering::SeqCst);
        f.instance.handle_trade(trade(dec!(101.50))).await.unwrap();
        assert_eq!(f.sim.submitted_orders().len(), 1);
        assert_eq!(f.host.constructed_positions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reused_strategy_skips_the_entry_signal() {
        let mut f = fixture().await;
        let position = Arc::new(Position::new(
            PositionRecord::new("combo-XYZ", "XYZ"),
            Instrument::equity("XYZ"),
        ));
        position.apply_fill(OrderSide::Buy, dec!(100), dec!(10), dec!(0));
        f.instance.add_position(position);

        assert!(f.instance.is_activated());
        f.instance.handle_trade(trade(dec!(101.00))).await.unwrap();
        assert!(f.sim.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn short_signal_needs_falling_slope() {
        let mut f = fixture().await;
        // drive the slope down through quotes
        for mid in [dec!(100), dec!(99), dec!(98)] {
            let q = Quote::new(mid - dec!(0.05), mid + dec!(0.05), 5, 5, Utc::now());
            f.instance.handle_quote(q).await.unwrap();
        }
        f.instance.handle_trade(trade(dec!(94.00))).await.unwrap();
        assert_eq!(f.sim.submitted_orders().len(), 1);
        assert_eq!(f.sim.submitted_orders()[0].side, OrderSide::Sell);
    }
}
