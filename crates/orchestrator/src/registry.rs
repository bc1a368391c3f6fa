//! Portfolio/strategy registry: the orchestration entry point.
//!
//! Loads the persisted portfolio/position hierarchy into the StrategyCache,
//! discovers candidate underlyings, resolves watches and option chains for
//! each, and constructs/starts strategy instances, reusing any persisted
//! combo portfolios instead of duplicating them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use basket_trade_core::chart::{ChartSink, PlSeries, TreeId};
use basket_trade_core::config::AppConfig;
use basket_trade_core::errors::TradeError;
use basket_trade_core::instrument::Instrument;
use basket_trade_core::order::{Order, OrderSide, OrderType};
use basket_trade_core::pivots::PivotSet;
use basket_trade_core::portfolio::{PortfolioId, PortfolioKind, PortfolioRecord};
use basket_trade_core::position::{Position, PositionRecord};
use basket_trade_core::traits::{
    ExecutionProvider, MarketData, MoneyManager, Persistence, PricingEngine, SeriesFilter,
};
use basket_trade_core::watch::Watch;

use basket_trade_options::aggregate::{load_chains, Aggregate};
use basket_trade_options::tracker::RollHost;

use crate::cache::StrategyCache;
use crate::strategy::{
    StrategyActor, StrategyCommand, StrategyHandle, StrategyHost, StrategyInstance, StrategyParams,
};

/// Externally-constructed services injected at startup, so tests can
/// substitute fakes for every collaborator.
#[derive(Clone)]
pub struct Services {
    pub market: Arc<dyn MarketData>,
    pub execution: Arc<dyn ExecutionProvider>,
    pub store: Arc<dyn Persistence>,
    pub pricing: Arc<dyn PricingEngine>,
    pub money: Arc<dyn MoneyManager>,
    pub chart: Arc<dyn ChartSink>,
}

struct ActiveStrategy {
    handle: StrategyHandle,
    task: Option<JoinHandle<()>>,
    chart_tree: Option<TreeId>,
}

struct WaitingStrategy {
    /// Present until the strategy is run.
    actor: Option<StrategyActor>,
    handle: StrategyHandle,
    /// Present once running while still awaiting authorization.
    task: Option<JoinHandle<()>>,
}

struct UnderlyingWithStrategies {
    watch: Watch,
    portfolio: PortfolioRecord,
    pivots: PivotSet,
    chains: Arc<RwLock<Aggregate>>,
    chain_task: Option<JoinHandle<()>>,
    tree: TreeId,
    /// Strategies keyed by combo portfolio id.
    active: HashMap<PortfolioId, ActiveStrategy>,
    /// At most one strategy under construction; single-writer.
    in_waiting: Option<WaitingStrategy>,
}

pub struct Registry {
    config: AppConfig,
    services: Services,
    master: PortfolioRecord,
    cache: Mutex<StrategyCache>,
    underlyings: Mutex<HashMap<String, UnderlyingWithStrategies>>,
    loaded: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    session_started: String,
    tree_root: TreeId,
    tree_underlying: TreeId,
    tree_strategies: TreeId,
}

impl Registry {
    pub fn new(config: AppConfig, services: Services, master: PortfolioRecord) -> Arc<Self> {
        let tree_root = services.chart.chart_root("Master P/L");
        let tree_underlying = services.chart.chart_add(tree_root, "Underlying");
        let tree_strategies = services.chart.chart_add(tree_root, "Strategies");

        let mut cache = StrategyCache::new();
        if let Err(e) = cache.add_portfolio(master.clone()) {
            warn!(error = %e, "Master portfolio seed failed");
        }

        Arc::new(Self {
            config,
            services,
            master,
            cache: Mutex::new(cache),
            underlyings: Mutex::new(HashMap::new()),
            loaded: AtomicBool::new(false),
            worker: Mutex::new(None),
            session_started: Utc::now().format("%Y%m%d-%H%M%S").to_string(),
            tree_root,
            tree_underlying,
            tree_strategies,
        })
    }

    /// Insert a persisted portfolio into the cache (database load path).
    pub async fn add_portfolio(&self, record: PortfolioRecord) -> Result<(), TradeError> {
        self.cache.lock().await.add_portfolio(record).map(|_| ())
    }

    /// Insert a persisted position into the cache (database load path).
    pub async fn add_position(&self, position: Arc<Position>) -> Result<(), TradeError> {
        self.cache.lock().await.add_position(position)
    }

    /// One-shot underlying discovery. Spawns a detached worker and returns
    /// immediately; a second call is a logged no-op.
    pub async fn load(self: &Arc<Self>, as_of: NaiveDate, emit_only: bool) -> Result<()> {
        if self.loaded.swap(true, Ordering::SeqCst) {
            info!("Registry already loaded");
            return Ok(());
        }
        let registry = Arc::clone(self);
        let worker = tokio::spawn(async move {
            if let Err(e) = registry.run_discovery(as_of, emit_only).await {
                error!(error = %e, "Underlying discovery failed");
            }
        });
        *self.worker.lock().await = Some(worker);
        Ok(())
    }

    /// Join the discovery worker; callers must do this before teardown.
    pub async fn await_load(&self) {
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Discovery worker panicked");
            }
        }
    }

    async fn run_discovery(self: &Arc<Self>, as_of: NaiveDate, emit_only: bool) -> Result<()> {
        // (a) carried-over underlyings with overnight positions, (b) union
        // with the configured candidate set
        let prefix = self.config.registry.underlying_prefix.clone();
        let mut symbols = { self.cache.lock().await.carried_underlyings(&prefix) };
        for candidate in &self.config.registry.candidate_symbols {
            if !symbols.contains(candidate) {
                symbols.push(candidate.clone());
            }
        }
        symbols.sort();
        info!(count = symbols.len(), ?as_of, "Underlying candidates gathered");

        for symbol in &symbols {
            if emit_only {
                if let Err(e) = self.emit_symbol_stats(symbol).await {
                    warn!(symbol, error = %e, "Statistics emit failed");
                }
            } else if let Err(e) = self.add_underlying(symbol).await {
                error!(symbol, error = %e, "Underlying failed to start");
            }
        }

        let chosen = self.underlyings.lock().await.len();
        info!(chosen, "Symbol load finished");
        Ok(())
    }

    async fn emit_symbol_stats(&self, symbol: &str) -> Result<()> {
        let bars = self
            .services
            .market
            .daily_bars(symbol, self.config.registry.daily_bar_count)
            .await?;
        let pivots = PivotSet::from_bars(symbol, &bars, self.config.registry.daily_bar_count)?;
        info!(
            symbol,
            pv = %pivots.pv,
            r1 = %pivots.r1,
            r2 = %pivots.r2,
            s1 = %pivots.s1,
            s2 = %pivots.s2,
            "Pivot statistics"
        );
        Ok(())
    }

    /// Resolve, watch, and start one underlying: instrument resolution
    /// (with the contract-detail round trip when needed), pivot computation
    /// from trailing bars, aggregate portfolio reuse-or-create, pricing
    /// engine registration, background chain population, then strategies.
    async fn add_underlying(self: &Arc<Self>, symbol: &str) -> Result<()> {
        if self.underlyings.lock().await.contains_key(symbol) {
            info!(symbol, "Underlying already added");
            return Ok(());
        }

        let mut instrument = self
            .services
            .market
            .resolve_instrument(symbol)
            .await
            .with_context(|| format!("resolving underlying {symbol}"))?;
        if !instrument.is_registered() {
            instrument = self
                .services
                .execution
                .request_contract_details(symbol, instrument)
                .await
                .with_context(|| format!("contract details for {symbol}"))?;
        }

        let bars = self
            .services
            .market
            .daily_bars(symbol, self.config.registry.daily_bar_count)
            .await?;
        let pivots = PivotSet::from_bars(symbol, &bars, self.config.registry.daily_bar_count)?;

        let aggregate_id = format!("{}{}", self.config.registry.underlying_prefix, symbol);
        let portfolio = {
            let mut cache = self.cache.lock().await;
            match cache.portfolio(&aggregate_id) {
                Some(existing) => existing,
                None => {
                    let record = PortfolioRecord::new(
                        aggregate_id.clone(),
                        Some(self.master.id.clone()),
                        PortfolioKind::Aggregate,
                        "Underlying Aggregate",
                    );
                    let record = self.services.store.construct_portfolio(record).await?;
                    cache.add_portfolio(record.clone())?;
                    record
                }
            }
        };

        let watch = Watch::new(instrument.clone(), Arc::clone(&self.services.market));
        self.services.pricing.register_watch(&instrument);
        let tree = self.services.chart.chart_add(self.tree_underlying, symbol);

        let chains = Arc::new(RwLock::new(Aggregate::new(watch.clone())));
        let chain_task = {
            let chains = Arc::clone(&chains);
            let market = Arc::clone(&self.services.market);
            let symbol = symbol.to_string();
            tokio::spawn(async move {
                match load_chains(&chains, &market, &SeriesFilter::default()).await {
                    Ok(count) => info!(symbol, count, "Option chain populated"),
                    Err(e) => warn!(symbol, error = %e, "Option chain population failed"),
                }
            })
        };

        {
            let mut underlyings = self.underlyings.lock().await;
            if underlyings.contains_key(symbol) {
                warn!(symbol, "Underlying raced into the map; keeping first");
                chain_task.abort();
                return Ok(());
            }
            underlyings.insert(
                symbol.to_string(),
                UnderlyingWithStrategies {
                    watch,
                    portfolio,
                    pivots,
                    chains,
                    chain_task: Some(chain_task),
                    tree,
                    active: HashMap::new(),
                    in_waiting: None,
                },
            );
        }

        self.start_strategies(symbol).await
    }

    /// Wire a new strategy instance into the underlying's in-waiting slot.
    /// The slot must be empty; concurrent construction for one underlying is
    /// disallowed.
    async fn construct_strategy(
        self: &Arc<Self>,
        symbol: &str,
        combo_id: PortfolioId,
    ) -> Result<(), TradeError> {
        let mut underlyings = self.underlyings.lock().await;
        let uws = underlyings
            .get_mut(symbol)
            .ok_or_else(|| TradeError::UnknownUnderlying(symbol.to_string()))?;
        if uws.in_waiting.is_some() {
            return Err(TradeError::StrategyInWaiting(symbol.to_string()));
        }

        let host = Arc::new(RegistryHost {
            registry: Arc::clone(self),
            symbol: symbol.to_string(),
            underlying: uws.watch.clone(),
            combo_id: combo_id.clone(),
        });
        let instance = StrategyInstance::new(StrategyParams {
            underlying: uws.watch.clone(),
            market: Arc::clone(&self.services.market),
            execution: Arc::clone(&self.services.execution),
            chart: Arc::clone(&self.services.chart),
            tree: uws.tree,
            aggregate_id: uws.portfolio.id.clone(),
            combo_id,
            pivots: uws.pivots,
            chains: Arc::clone(&uws.chains),
            host: Arc::clone(&host) as Arc<dyn StrategyHost>,
            roll_host: host as Arc<dyn RollHost>,
            order_size: self.config.registry.default_order_size,
            roll: self.config.roll.clone(),
        });
        let (actor, handle) = StrategyActor::new(instance);
        uws.in_waiting = Some(WaitingStrategy {
            actor: Some(actor),
            handle,
            task: None,
        });
        Ok(())
    }

    /// Run the in-waiting strategy; it stays in the slot until its combo
    /// portfolio construction promotes it to the active map.
    async fn run_waiting(&self, symbol: &str) -> Result<(), TradeError> {
        let mut underlyings = self.underlyings.lock().await;
        let uws = underlyings
            .get_mut(symbol)
            .ok_or_else(|| TradeError::UnknownUnderlying(symbol.to_string()))?;
        let Some(waiting) = uws.in_waiting.as_mut() else {
            return Ok(());
        };
        let Some(actor) = waiting.actor.take() else {
            return Ok(());
        };
        waiting.task = Some(tokio::spawn(async move {
            if let Err(e) = actor.run().await {
                error!(error = %e, "Strategy actor failed");
            }
        }));
        Ok(())
    }

    /// One-shot move of the in-waiting strategy into the active map; a
    /// repeat for an already-active combo is a guarded no-op.
    async fn promote_waiting(&self, symbol: &str, combo_id: &PortfolioId) {
        let mut underlyings = self.underlyings.lock().await;
        let Some(uws) = underlyings.get_mut(symbol) else {
            return;
        };
        if uws.active.contains_key(combo_id) {
            return;
        }
        let Some(waiting) = uws.in_waiting.take() else {
            return;
        };
        debug_assert!(waiting.actor.is_none(), "promoting a strategy that never ran");
        uws.active.insert(
            combo_id.clone(),
            ActiveStrategy {
                handle: waiting.handle,
                task: waiting.task,
                chart_tree: None,
            },
        );
        info!(symbol, combo = %combo_id, "Strategy active");
    }

    /// Chart-activate an active strategy exactly once.
    async fn chart_activate(&self, symbol: &str, combo_id: &PortfolioId) {
        let mut underlyings = self.underlyings.lock().await;
        let Some(uws) = underlyings.get_mut(symbol) else {
            return;
        };
        let Some(active) = uws.active.get_mut(combo_id) else {
            return;
        };
        if active.chart_tree.is_none() {
            active.chart_tree = Some(self.services.chart.chart_add(self.tree_strategies, combo_id));
        }
    }

    /// Reuse path: every persisted combo under this underlying's aggregate
    /// portfolio with at least one active position gets its strategy
    /// reconstructed and run. If none reactivates, exactly one default
    /// strategy is constructed and run, so every underlying always ends up
    /// with at least one running strategy without duplicating live risk.
    async fn start_strategies(self: &Arc<Self>, symbol: &str) -> Result<()> {
        let aggregate_id = format!("{}{}", self.config.registry.underlying_prefix, symbol);
        let combos = {
            let mut cache = self.cache.lock().await;
            let combos = cache.combos_of(&aggregate_id);
            cache.mark_accessed(&aggregate_id);
            combos
        };

        let mut reactivated = 0usize;
        for (combo_id, positions) in combos {
            let active_positions: Vec<Arc<Position>> =
                positions.into_iter().filter(|p| p.is_active()).collect();
            if active_positions.is_empty() {
                info!(combo = %combo_id, "Persisted combo has no active positions; skipped");
                continue;
            }
            self.construct_strategy(symbol, combo_id.clone()).await?;
            {
                let mut underlyings = self.underlyings.lock().await;
                let uws = underlyings
                    .get_mut(symbol)
                    .ok_or_else(|| TradeError::UnknownUnderlying(symbol.to_string()))?;
                let Some(mut waiting) = uws.in_waiting.take() else {
                    continue;
                };
                let Some(mut actor) = waiting.actor.take() else {
                    warn!(combo = %combo_id, "Waiting strategy already running; skipped");
                    continue;
                };
                for position in active_positions {
                    actor.instance_mut().add_position(position);
                }
                let task = tokio::spawn(async move {
                    if let Err(e) = actor.run().await {
                        error!(error = %e, "Strategy actor failed");
                    }
                });
                uws.active.insert(
                    combo_id.clone(),
                    ActiveStrategy {
                        handle: waiting.handle,
                        task: Some(task),
                        chart_tree: None,
                    },
                );
            }
            self.chart_activate(symbol, &combo_id).await;
            info!(symbol, combo = %combo_id, "Reactivated persisted combo strategy");
            reactivated += 1;
        }

        if reactivated == 0 {
            let combo_id = format!("combo-{symbol}");
            self.construct_strategy(symbol, combo_id).await?;
            self.run_waiting(symbol).await?;
            info!(symbol, "Default strategy running");
        }
        Ok(())
    }

    fn strategy_handles_locked(
        underlyings: &HashMap<String, UnderlyingWithStrategies>,
    ) -> Vec<StrategyHandle> {
        let mut handles = Vec::new();
        for uws in underlyings.values() {
            handles.extend(uws.active.values().map(|a| a.handle.clone()));
            if let Some(waiting) = uws.in_waiting.as_ref() {
                handles.push(waiting.handle.clone());
            }
        }
        handles
    }

    async fn strategy_handles(&self) -> Vec<StrategyHandle> {
        Self::strategy_handles_locked(&*self.underlyings.lock().await)
    }

    /// Best-effort fan-out: a failed delivery is logged and never aborts
    /// the broadcast.
    async fn broadcast<F>(&self, make: F, what: &str)
    where
        F: Fn() -> StrategyCommand,
    {
        for handle in self.strategy_handles().await {
            if let Err(e) = handle.send(make()).await {
                warn!(what, combo = %handle.combo_id(), error = %e, "Broadcast delivery failed");
            }
        }
    }

    pub async fn close_positions(&self) {
        self.broadcast(|| StrategyCommand::ClosePositions, "close_positions").await;
    }

    pub async fn close_for_profits(&self) {
        self.broadcast(|| StrategyCommand::CloseForProfits, "close_for_profits").await;
    }

    pub async fn take_profits(&self) {
        self.broadcast(|| StrategyCommand::TakeProfits, "take_profits").await;
    }

    pub async fn handle_cancel(&self) {
        self.broadcast(|| StrategyCommand::HandleCancel, "handle_cancel").await;
    }

    pub async fn handle_go_neutral(&self) {
        self.broadcast(|| StrategyCommand::HandleGoNeutral, "handle_go_neutral").await;
    }

    pub async fn test_itm_roll(&self, date: NaiveDate) {
        self.broadcast(move || StrategyCommand::TestItmRoll(date), "test_itm_roll").await;
    }

    /// Persist collected series under `prefix` + session start timestamp.
    pub async fn save_series(&self, prefix: &str) {
        let path = format!("{prefix}{}", self.session_started);
        self.services.chart.save(&path);
        let path_for = path.clone();
        self.broadcast(move || StrategyCommand::SaveSeries(path_for.clone()), "save_series").await;
        info!(path, "Series saved");
    }

    /// Fold per-strategy statistics and log the portfolio net.
    pub async fn emit_info(&self) -> Decimal {
        let mut net = Decimal::ZERO;
        for handle in self.strategy_handles().await {
            match handle.emit_info().await {
                Ok(stats) => net += stats.net(),
                Err(e) => warn!(combo = %handle.combo_id(), error = %e, "Info request failed"),
            }
        }
        info!(net = %net, "Portfolio net");
        net
    }

    /// Append master-level P/L series points.
    pub fn update_chart(
        &self,
        current: Decimal,
        unrealized: Decimal,
        realized: Decimal,
        commission: Decimal,
    ) {
        let at = Utc::now();
        let chart = &self.services.chart;
        chart.append_pl(self.tree_root, PlSeries::Current, at, current);
        chart.append_pl(self.tree_root, PlSeries::Unrealized, at, unrealized);
        chart.append_pl(self.tree_root, PlSeries::Realized, at, realized);
        chart.append_pl(self.tree_root, PlSeries::Commission, at, commission);
    }

    pub async fn underlying_count(&self) -> usize {
        self.underlyings.lock().await.len()
    }

    pub async fn active_strategy_count(&self, symbol: &str) -> usize {
        self.underlyings
            .lock()
            .await
            .get(symbol)
            .map_or(0, |uws| uws.active.len())
    }

    pub async fn has_waiting_strategy(&self, symbol: &str) -> bool {
        self.underlyings
            .lock()
            .await
            .get(symbol)
            .is_some_and(|uws| uws.in_waiting.is_some())
    }

    pub async fn portfolio_cached(&self, id: &str) -> bool {
        self.cache.lock().await.portfolio(&id.to_string()).is_some()
    }

    pub async fn position_cached(&self, portfolio: &str, instrument: &str) -> bool {
        self.cache
            .lock()
            .await
            .find_position(&portfolio.to_string(), instrument)
            .is_some()
    }

    pub async fn chain_expiries(&self, symbol: &str) -> Vec<NaiveDate> {
        let chains = {
            let underlyings = self.underlyings.lock().await;
            underlyings.get(symbol).map(|uws| Arc::clone(&uws.chains))
        };
        match chains {
            Some(chains) => chains.read().await.expiries(),
            None => Vec::new(),
        }
    }

    /// Tear down: join the discovery worker, stop chain population, shut
    /// down every strategy actor, and drop the underlying map.
    pub async fn shutdown(&self) {
        self.await_load().await;
        let (chain_tasks, handles, tasks) = {
            let mut underlyings = self.underlyings.lock().await;
            let mut chain_tasks = Vec::new();
            let mut handles = Vec::new();
            let mut tasks = Vec::new();
            for uws in underlyings.values_mut() {
                if let Some(task) = uws.chain_task.take() {
                    chain_tasks.push(task);
                }
                for active in uws.active.values_mut() {
                    handles.push(active.handle.clone());
                    if let Some(task) = active.task.take() {
                        tasks.push(task);
                    }
                }
                if let Some(waiting) = uws.in_waiting.as_mut() {
                    handles.push(waiting.handle.clone());
                    waiting.actor = None;
                    if let Some(task) = waiting.task.take() {
                        tasks.push(task);
                    }
                }
            }
            underlyings.clear();
            (chain_tasks, handles, tasks)
        };
        for task in chain_tasks {
            task.abort();
        }
        for handle in handles {
            let _ = handle.shutdown().await;
        }
        for task in tasks {
            let _ = task.await;
        }
        info!("Registry shut down");
    }
}

/// Per-strategy collaborator bundle backed by the registry: the cache-first
/// construction hooks, pricing-engine registration, and authorization
/// gates, plus the roll-tracker leg operations.
struct RegistryHost {
    registry: Arc<Registry>,
    symbol: String,
    underlying: Watch,
    combo_id: PortfolioId,
}

impl RegistryHost {
    async fn resolve_option_watch(&self, symbol: &str) -> Result<Watch> {
        let services = &self.registry.services;
        let mut instrument = services
            .market
            .resolve_instrument(symbol)
            .await
            .with_context(|| format!("resolving option {symbol}"))?;
        if !instrument.is_registered() {
            instrument = services
                .execution
                .request_contract_details(symbol, instrument)
                .await
                .with_context(|| format!("contract details for option {symbol}"))?;
        }
        Ok(Watch::new(instrument, Arc::clone(&services.market)))
    }

    /// Find-or-create the combo portfolio entry under one cache lock.
    async fn ensure_portfolio(
        &self,
        cache: &mut StrategyCache,
        id: &PortfolioId,
        owner: &PortfolioId,
    ) -> Result<PortfolioRecord> {
        if let Some(existing) = cache.portfolio(id) {
            return Ok(existing);
        }
        let record = PortfolioRecord::new(
            id.clone(),
            Some(owner.clone()),
            PortfolioKind::MultiLeggedPosition,
            "Combo",
        );
        let record = self.registry.services.store.construct_portfolio(record).await?;
        cache.add_portfolio(record.clone())?;
        Ok(record)
    }

    /// Market-close an order's worth of a leg, applying the fill to the
    /// position when it arrives.
    async fn submit_leg_order(
        &self,
        position: &Arc<Position>,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<()> {
        let execution = &self.registry.services.execution;
        let order = execution.construct_order(
            position.instrument(),
            OrderType::Market,
            side,
            quantity,
        );
        let mut events = execution.subscribe_order_events(order.id);
        execution.place_order(&order).await?;
        let bookkeeping = Arc::clone(position);
        tokio::spawn(async move {
            if let Some(basket_trade_core::events::OrderEvent::Filled {
                avg_price,
                quantity,
                commission,
                ..
            }) = events.recv().await
            {
                bookkeeping.apply_fill(side, quantity, avg_price, commission);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl StrategyHost for RegistryHost {
    async fn construct_option(&self, symbol: &str) -> Result<Watch> {
        self.resolve_option_watch(symbol).await
    }

    async fn construct_position(
        &self,
        portfolio: &PortfolioId,
        watch: &Watch,
        notes: &str,
    ) -> Result<Arc<Position>> {
        // one lock across find and create
        let mut cache = self.registry.cache.lock().await;
        if let Some(existing) = cache.find_position(portfolio, watch.name()) {
            info!(instrument = watch.name(), portfolio = %portfolio, "Reusing cached position");
            return Ok(existing);
        }
        // position construction may precede portfolio construction; make
        // sure the owning entry exists
        let aggregate_id = self.registry.config.registry.underlying_prefix.clone() + &self.symbol;
        self.ensure_portfolio(&mut cache, portfolio, &aggregate_id).await?;

        let mut record = PositionRecord::new(portfolio.clone(), watch.name());
        record.notes = notes.to_string();
        let record = self.registry.services.store.construct_position(record).await?;
        if !notes.is_empty() {
            self.registry
                .services
                .store
                .update_position_notes(portfolio, watch.name(), notes)
                .await?;
        }
        let position = Arc::new(Position::new(record, watch.instrument().clone()));
        cache.add_position(Arc::clone(&position))?;
        Ok(position)
    }

    async fn construct_portfolio(
        &self,
        id: &PortfolioId,
        owner: &PortfolioId,
    ) -> Result<PortfolioRecord> {
        let record = {
            let mut cache = self.registry.cache.lock().await;
            self.ensure_portfolio(&mut cache, id, owner).await?
        };
        self.registry.promote_waiting(&self.symbol, id).await;
        Ok(record)
    }

    fn register_watch(&self, instrument: &Instrument) {
        self.registry.services.pricing.register_watch(instrument);
    }

    fn register_option(&self, instrument: &Instrument) {
        self.registry.services.pricing.register_option(instrument);
    }

    fn start_greeks(&self, option: &Instrument, underlying: &Instrument) {
        self.registry.services.pricing.start_greeks(option, underlying);
    }

    fn stop_greeks(&self, option: &Instrument, underlying: &Instrument) {
        self.registry.services.pricing.stop_greeks(option, underlying);
    }

    async fn authorize_underlying(
        &self,
        order: &Order,
        position: &Position,
        portfolio: &PortfolioRecord,
    ) -> bool {
        self.registry
            .services
            .money
            .authorize_underlying(order, position, portfolio)
    }

    async fn authorize_option(
        &self,
        order: &Order,
        position: &Position,
        portfolio: &PortfolioRecord,
        instrument: &Instrument,
    ) -> bool {
        self.registry
            .services
            .money
            .authorize_option(order, position, portfolio, instrument)
    }

    async fn authorize_simple(&self, portfolio: &PortfolioId, name: &str, exists: bool) -> bool {
        let authorized = self.registry.services.money.authorize(name);
        if authorized || exists {
            self.registry.chart_activate(&self.symbol, portfolio).await;
        }
        authorized
    }
}

#[async_trait]
impl RollHost for RegistryHost {
    async fn construct_option(&self, symbol: &str) -> Result<Watch> {
        self.resolve_option_watch(symbol).await
    }

    async fn close_leg(&self, position: Arc<Position>) -> Result<()> {
        if !position.is_active() {
            return Ok(());
        }
        let size = position.active_size();
        let side = if size > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        info!(instrument = %position.instrument().name, size = %size, "Closing leg");
        self.submit_leg_order(&position, side, size.abs()).await?;
        self.registry
            .services
            .pricing
            .stop_greeks(position.instrument(), self.underlying.instrument());
        Ok(())
    }

    async fn open_leg(&self, option: Watch, notes: &str) -> Result<Arc<Position>> {
        let position =
            StrategyHost::construct_position(self, &self.combo_id, &option, notes).await?;
        self.registry.services.pricing.register_option(option.instrument());
        self.registry
            .services
            .pricing
            .start_greeks(option.instrument(), self.underlying.instrument());
        info!(instrument = %option.name(), "Opening replacement leg");
        self.submit_leg_order(&position, OrderSide::Buy, Decimal::ONE).await?;
        Ok(position)
    }
}
