//! Option roll tracker.
//!
//! Watches one option leg's moneyness against the live underlying price and
//! slope and replaces ("rolls") the leg with a deeper in-the-money option
//! when the per-share economics clear, net of spread and commission. A
//! forced variant rolls regardless of economics at expiry, and a short-leg
//! variant closes the leg outright once its ask collapses.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};

use basket_trade_core::config::RollConfig;
use basket_trade_core::errors::TradeError;
use basket_trade_core::events::Quote;
use basket_trade_core::instrument::OptionRight;
use basket_trade_core::position::Position;
use basket_trade_core::subscription::Subscription;
use basket_trade_core::watch::Watch;

use crate::aggregate::Aggregate;

/// Hooks the tracker needs from its owner: option acquisition and leg
/// close/open, each asynchronous against the provider.
#[async_trait]
pub trait RollHost: Send + Sync {
    /// Resolve and watch the named option.
    async fn construct_option(&self, symbol: &str) -> Result<Watch>;
    /// Close out the current leg, realizing its value.
    async fn close_leg(&self, position: Arc<Position>) -> Result<()>;
    /// Open a replacement leg, carrying the notes forward.
    async fn open_leg(&self, option: Watch, notes: &str) -> Result<Arc<Position>>;
}

/// Roll lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Initial,
    Track,
    Vacant,
    Acquire,
    Roll,
    Fill,
    Quiesce,
    Done,
}

type CompareFn = fn(Decimal, Decimal) -> bool;

fn gt(a: Decimal, b: Decimal) -> bool {
    a > b
}
fn lt(a: Decimal, b: Decimal) -> bool {
    a < b
}

struct Candidate {
    watch: Watch,
    quotes: Subscription<Quote>,
}

pub struct Tracker {
    transition: Transition,
    config: RollConfig,
    chain: Arc<RwLock<Aggregate>>,
    expiry: NaiveDate,
    host: Arc<dyn RollHost>,
    position: Option<Arc<Position>>,
    strike_position: Decimal,
    side_position: OptionRight,
    /// "More in the money" comparator, bound per initialize and cleared on
    /// roll/quiesce to break the cycle with the owning chain.
    compare: Option<CompareFn>,
    underlying_price: Decimal,
    underlying_slope: Decimal,
    candidate: Option<Candidate>,
}

impl Tracker {
    pub fn new(
        config: RollConfig,
        chain: Arc<RwLock<Aggregate>>,
        expiry: NaiveDate,
        host: Arc<dyn RollHost>,
    ) -> Self {
        Self {
            transition: Transition::Initial,
            config,
            chain,
            expiry,
            host,
            position: None,
            strike_position: Decimal::ZERO,
            side_position: OptionRight::Call,
            compare: None,
            underlying_price: Decimal::ZERO,
            underlying_slope: Decimal::ZERO,
            candidate: None,
        }
    }

    pub fn transition(&self) -> Transition {
        self.transition
    }

    pub fn position(&self) -> Option<Arc<Position>> {
        self.position.clone()
    }

    pub fn has_candidate(&self) -> bool {
        self.candidate.is_some()
    }

    pub fn candidate_strike(&self) -> Option<Decimal> {
        self.candidate
            .as_ref()
            .and_then(|c| c.watch.instrument().strike())
    }

    /// Begin tracking a leg. Valid only from `Initial`.
    pub fn initialize(&mut self, position: Arc<Position>) -> Result<(), TradeError> {
        if self.transition != Transition::Initial {
            return Err(TradeError::SlotOccupied("tracker"));
        }
        self.bind_position(position)?;
        self.transition = Transition::Track;
        Ok(())
    }

    fn bind_position(&mut self, position: Arc<Position>) -> Result<(), TradeError> {
        let instrument = position.instrument();
        let (strike, right) = instrument
            .strike()
            .zip(instrument.right())
            .ok_or_else(|| TradeError::NotAnOption(instrument.name.clone()))?;
        self.strike_position = strike;
        self.side_position = right;
        self.compare = Some(match right {
            OptionRight::Call => gt,
            OptionRight::Put => lt,
        });
        self.position = Some(position);
        Ok(())
    }

    /// Long-leg tracking: on each underlying update, begin acquiring a
    /// candidate at the strike now in the money when it is deeper than both
    /// the held strike and any candidate already watched.
    pub async fn test_long(&mut self, slope: Decimal, price: Decimal) {
        if self.transition != Transition::Track {
            return;
        }
        self.underlying_price = price;
        self.underlying_slope = slope;

        let Some(compare) = self.compare else { return };
        let strike_itm = {
            let chains = self.chain.read().await;
            chains
                .chain(self.expiry)
                .and_then(|c| c.itm(price, self.side_position))
        };
        let Some(strike_itm) = strike_itm else { return };

        if !compare(strike_itm, self.strike_position) {
            // hasn't moved enough itm
            return;
        }
        match self.candidate_strike() {
            Some(candidate_strike) => {
                if compare(strike_itm, candidate_strike) {
                    // market moved even further itm; replace the watch
                    self.transition = Transition::Vacant;
                    self.candidate = None;
                    self.construct(strike_itm).await;
                }
            }
            None => {
                self.transition = Transition::Vacant;
                self.construct(strike_itm).await;
            }
        }
    }

    /// Short-leg variant: close outright once the quoted ask collapses near
    /// zero, realizing the remaining value rather than rolling.
    pub async fn test_short(&mut self, slope: Decimal, price: Decimal) -> Result<()> {
        if self.transition != Transition::Track {
            return Ok(());
        }
        self.underlying_price = price;
        self.underlying_slope = slope;

        let Some(position) = self.position.clone() else {
            return Ok(());
        };
        let Some(quote) = position.last_quote() else {
            return Ok(());
        };
        if quote.is_usable()
            && quote.ask > quote.bid
            && quote.ask <= self.config.short_close_ask
        {
            info!(
                instrument = %position.instrument().name,
                ask = %quote.ask,
                "Short leg ask collapsed; closing"
            );
            self.transition = Transition::Fill;
            self.position = None;
            self.host.close_leg(position).await?;
            self.transition = Transition::Initial;
        }
        Ok(())
    }

    async fn construct(&mut self, strike_itm: Decimal) {
        self.transition = Transition::Acquire;
        let symbol = {
            let chains = self.chain.read().await;
            match chains
                .chain(self.expiry)
                .map(|c| c.symbol_at(strike_itm, self.side_position).map(str::to_string))
            {
                Some(Ok(symbol)) => symbol,
                _ => {
                    warn!(strike = %strike_itm, "No resolved symbol for candidate strike");
                    self.transition = Transition::Track;
                    return;
                }
            }
        };
        info!(symbol, "Acquiring roll candidate");
        match self.host.construct_option(&symbol).await {
            Ok(watch) => {
                let quotes = watch.subscribe_quotes();
                self.candidate = Some(Candidate { watch, quotes });
                self.transition = Transition::Track;
            }
            Err(e) => {
                warn!(symbol, error = %e, "Candidate acquisition failed");
                self.transition = Transition::Track;
            }
        }
    }

    /// Poll for the next quote on the candidate watch; pending while no
    /// candidate is held.
    pub fn poll_candidate_quote(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Quote>> {
        match &mut self.candidate {
            Some(candidate) => candidate.quotes.poll_recv(cx),
            None => std::task::Poll::Pending,
        }
    }

    /// Await the next quote on the candidate watch; pends forever while no
    /// candidate is held, for use in a `select!` pump.
    pub async fn candidate_quote(&mut self) -> Option<Quote> {
        std::future::poll_fn(|cx| self.poll_candidate_quote(cx)).await
    }

    /// Candidate quote handler: roll only when the underlying slope is
    /// unfavorable AND the projected per-share economics clear the
    /// configured threshold net of twice the candidate spread and the
    /// commission allowance.
    pub async fn handle_candidate_quote(&mut self, quote: Quote) -> Result<()> {
        if self.transition != Transition::Track || self.candidate.is_none() {
            return Ok(());
        }
        let Some(compare) = self.compare else {
            return Ok(());
        };
        if compare(self.underlying_slope, Decimal::ZERO) {
            // slope still favorable for the held side
            return Ok(());
        }
        let Some(position) = self.position.clone() else {
            return Ok(());
        };
        let per_contract = position.active_size().abs() * position.instrument().multiplier;
        if per_contract.is_zero() {
            return Ok(());
        }
        // unrealized already carries the entry spread; this accounts for the
        // exit side plus commissions and spare change
        let mut diff = position.unrealized_pnl() / per_contract;
        diff -= Decimal::TWO * quote.spread();
        diff -= self.config.commission_allowance;
        if diff <= self.config.min_roll_profit {
            return Ok(());
        }
        if quote.bid_size == 0 || quote.bid <= Decimal::ZERO {
            // no one will buy our stuff
            return Ok(());
        }

        let Some(candidate) = self.candidate.take() else {
            return Ok(());
        };
        let old_quote = position.last_quote();
        info!(
            old = %position.instrument().name,
            old_bid = %old_quote.map(|q| q.bid).unwrap_or_default(),
            old_ask = %old_quote.map(|q| q.ask).unwrap_or_default(),
            new = %candidate.watch.name(),
            new_bid = %quote.bid,
            new_ask = %quote.ask,
            roll_per_share = %diff,
            underlying = %self.underlying_price,
            slope = %self.underlying_slope,
            "Rolling leg"
        );

        self.transition = Transition::Roll;
        self.compare = None;
        let watch = candidate.watch;
        let notes = position.notes();
        self.position = None;
        self.host.close_leg(position).await?;
        self.transition = Transition::Initial;
        let replacement = self.host.open_leg(watch, &notes).await?;
        self.bind_position(replacement)?;
        self.transition = Transition::Track;
        Ok(())
    }

    /// Forced roll at expiry: while quiescent, a leg still active on its
    /// expiry date is closed and reconstructed at the same strike with no
    /// profitability gate.
    pub async fn test_itm_roll(&mut self, date: NaiveDate) -> Result<()> {
        if self.transition != Transition::Quiesce {
            warn!(state = ?self.transition, "test_itm_roll in unexpected state");
            return Ok(());
        }
        let Some(position) = self.position.clone() else {
            return Ok(());
        };
        if !position.is_active() || position.instrument().expiry() != Some(date) {
            return Ok(());
        }

        self.transition = Transition::Roll;
        let strike = self.strike_position;
        let side = self.side_position;
        self.compare = None;
        let notes = position.notes();
        self.position = None;
        self.host.close_leg(position).await?;

        let symbol = {
            let chains = self.chain.read().await;
            match chains
                .chain(self.expiry)
                .map(|c| c.symbol_at(strike, side).map(str::to_string))
            {
                Some(Ok(symbol)) => symbol,
                _ => {
                    return Err(TradeError::NoSuchStrike { right: side, price: strike }.into());
                }
            }
        };
        info!(symbol, "Forced expiry roll");
        let watch = self.host.construct_option(&symbol).await?;
        let replacement = self.host.open_leg(watch, &notes).await?;
        self.bind_position(replacement)?;
        self.transition = Transition::Quiesce;
        Ok(())
    }

    /// Stop candidate watching and hold for expiry processing.
    pub fn quiesce(&mut self) {
        self.transition = Transition::Quiesce;
        self.candidate = None;
    }

    /// Terminal teardown: clears the comparator binding and the leg.
    pub fn shutdown(&mut self) {
        self.candidate = None;
        self.compare = None;
        self.position = None;
        self.transition = Transition::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    use basket_trade_core::instrument::Instrument;
    use basket_trade_core::option_name;
    use basket_trade_core::position::PositionRecord;
    use basket_trade_core::traits::MarketData;
    use basket_trade_provider::SimProvider;

    struct TestHost {
        provider: Arc<SimProvider>,
        closed: Mutex<Vec<String>>,
        opened: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RollHost for TestHost {
        async fn construct_option(&self, symbol: &str) -> Result<Watch> {
            let instrument = self.provider.resolve_instrument(symbol).await?;
            Ok(Watch::new(
                instrument,
                Arc::clone(&self.provider) as Arc<dyn MarketData>,
            ))
        }

        async fn close_leg(&self, position: Arc<Position>) -> Result<()> {
            self.closed
                .lock()
                .unwrap()
                .push(position.instrument().name.clone());
            Ok(())
        }

        async fn open_leg(&self, option: Watch, notes: &str) -> Result<Arc<Position>> {
            self.opened.lock().unwrap().push(option.name().to_string());
            let mut record = PositionRecord::new("combo-XYZ", option.name());
            record.notes = notes.to_string();
            let position = Arc::new(Position::new(record, option.instrument().clone()));
            position.apply_fill(
                basket_trade_core::OrderSide::Buy,
                dec!(1),
                dec!(1.00),
                dec!(0),
            );
            Ok(position)
        }
    }

    struct Fixture {
        tracker: Tracker,
        host: Arc<TestHost>,
        expiry: NaiveDate,
    }

    async fn fixture(strikes: &[i64], right: OptionRight) -> Fixture {
        let provider = Arc::new(SimProvider::new());
        provider.register_equity("XYZ");
        let expiry = NaiveDate::from_ymd_opt(2026, 6, 19).unwrap();

        let underlying = Watch::new(
            Instrument::equity("XYZ"),
            Arc::clone(&provider) as Arc<dyn MarketData>,
        );
        let mut aggregate = Aggregate::new(underlying);
        for &k in strikes {
            aggregate.insert_option(Instrument::option("XYZ", expiry, Decimal::from(k), right));
        }
        let chain = Arc::new(RwLock::new(aggregate));

        let host = Arc::new(TestHost {
            provider,
            closed: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        });
        let tracker = Tracker::new(
            RollConfig::default(),
            chain,
            expiry,
            Arc::clone(&host) as Arc<dyn RollHost>,
        );
        Fixture { tracker, host, expiry }
    }

    /// Long call held at strike 100, entered at 3.00 with one contract.
    fn held_call(expiry: NaiveDate, bid: Decimal) -> Arc<Position> {
        let instrument = Instrument::option("XYZ", expiry, dec!(100), OptionRight::Call);
        let mut record = PositionRecord::new("combo-XYZ", &instrument.name);
        record.notes = "initial leg".to_string();
        let position = Arc::new(Position::new(record, instrument));
        position.apply_fill(basket_trade_core::OrderSide::Buy, dec!(1), dec!(3.00), dec!(0));
        position.update_quote(Quote::new(bid, bid + dec!(0.20), 5, 5, Utc::now()));
        position
    }

    fn candidate_quote(bid: Decimal, ask: Decimal) -> Quote {
        Quote::new(bid, ask, 5, 5, Utc::now())
    }

    #[tokio::test]
    async fn acquires_candidate_when_market_moves_itm() {
        let mut f = fixture(&[95, 100, 105, 110], OptionRight::Call).await;
        f.tracker.initialize(held_call(f.expiry, dec!(4.00))).unwrap();

        f.tracker.test_long(dec!(0.5), dec!(106)).await;
        assert_eq!(f.tracker.candidate_strike(), Some(dec!(105)));

        // deeper move replaces the candidate watch
        f.tracker.test_long(dec!(0.5), dec!(111)).await;
        assert_eq!(f.tracker.candidate_strike(), Some(dec!(110)));

        // retreat does not replace
        f.tracker.test_long(dec!(0.5), dec!(106)).await;
        assert_eq!(f.tracker.candidate_strike(), Some(dec!(110)));
        assert!(f.host.opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_candidate_until_strike_passes_held() {
        let mut f = fixture(&[95, 100, 105], OptionRight::Call).await;
        f.tracker.initialize(held_call(f.expiry, dec!(4.00))).unwrap();

        // itm strike is 100 == held strike; not strictly deeper
        f.tracker.test_long(dec!(0.5), dec!(104)).await;
        assert!(!f.tracker.has_candidate());
    }

    #[tokio::test]
    async fn roll_fires_on_unfavorable_slope_and_cleared_economics() {
        let mut f = fixture(&[100, 105], OptionRight::Call).await;
        f.tracker.initialize(held_call(f.expiry, dec!(4.00))).unwrap();
        f.tracker.test_long(dec!(-0.5), dec!(106)).await;
        assert!(f.tracker.has_candidate());

        // p = 1.00 per share, s = 0.20, c = 0.10: 1.00 - 0.40 - 0.10 = 0.50 > 0.10
        f.tracker
            .handle_candidate_quote(candidate_quote(dec!(4.90), dec!(5.10)))
            .await
            .unwrap();

        assert_eq!(f.host.closed.lock().unwrap().len(), 1);
        let opened = f.host.opened.lock().unwrap().clone();
        assert_eq!(
            opened,
            vec![option_name("XYZ", f.expiry, dec!(105), OptionRight::Call)]
        );
        assert_eq!(f.tracker.transition(), Transition::Track);
        // the replacement leg carries the notes forward
        assert_eq!(f.tracker.position().unwrap().notes(), "initial leg");
        assert!(!f.tracker.has_candidate());
    }

    #[tokio::test]
    async fn favorable_slope_blocks_roll_regardless_of_economics() {
        let mut f = fixture(&[100, 105], OptionRight::Call).await;
        f.tracker.initialize(held_call(f.expiry, dec!(9.00))).unwrap();
        f.tracker.test_long(dec!(0.5), dec!(106)).await;

        f.tracker
            .handle_candidate_quote(candidate_quote(dec!(4.90), dec!(5.10)))
            .await
            .unwrap();
        assert!(f.host.closed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn thin_economics_block_roll() {
        let mut f = fixture(&[100, 105], OptionRight::Call).await;
        // bid 3.30: p = 0.30, 0.30 - 0.40 - 0.10 < 0.10
        f.tracker.initialize(held_call(f.expiry, dec!(3.30))).unwrap();
        f.tracker.test_long(dec!(-0.5), dec!(106)).await;

        f.tracker
            .handle_candidate_quote(candidate_quote(dec!(4.90), dec!(5.10)))
            .await
            .unwrap();
        assert!(f.host.closed.lock().unwrap().is_empty());
        assert!(f.tracker.has_candidate());
    }

    #[tokio::test]
    async fn empty_candidate_bid_blocks_roll() {
        let mut f = fixture(&[100, 105], OptionRight::Call).await;
        f.tracker.initialize(held_call(f.expiry, dec!(4.00))).unwrap();
        f.tracker.test_long(dec!(-0.5), dec!(106)).await;

        let quote = Quote::new(dec!(0), dec!(0.10), 0, 5, Utc::now());
        f.tracker.handle_candidate_quote(quote).await.unwrap();
        assert!(f.host.closed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn expiry_roll_is_unconditional_while_quiescent() {
        let mut f = fixture(&[100, 105], OptionRight::Call).await;
        // deeply losing leg; economics would never clear
        f.tracker.initialize(held_call(f.expiry, dec!(0.50))).unwrap();
        f.tracker.quiesce();

        f.tracker.test_itm_roll(f.expiry).await.unwrap();

        assert_eq!(f.host.closed.lock().unwrap().len(), 1);
        assert_eq!(
            f.host.opened.lock().unwrap().clone(),
            vec![option_name("XYZ", f.expiry, dec!(100), OptionRight::Call)]
        );
        assert_eq!(f.tracker.transition(), Transition::Quiesce);
    }

    #[tokio::test]
    async fn expiry_roll_skips_other_dates() {
        let mut f = fixture(&[100, 105], OptionRight::Call).await;
        f.tracker.initialize(held_call(f.expiry, dec!(4.00))).unwrap();
        f.tracker.quiesce();

        f.tracker
            .test_itm_roll(f.expiry + chrono::Duration::days(1))
            .await
            .unwrap();
        assert!(f.host.closed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_leg_closes_when_ask_collapses() {
        let mut f = fixture(&[95, 100], OptionRight::Put).await;
        let instrument = Instrument::option("XYZ", f.expiry, dec!(100), OptionRight::Put);
        let record = PositionRecord::new("combo-XYZ", &instrument.name);
        let position = Arc::new(Position::new(record, instrument));
        position.apply_fill(basket_trade_core::OrderSide::Sell, dec!(1), dec!(2.00), dec!(0));
        position.update_quote(Quote::new(dec!(0.05), dec!(0.10), 5, 5, Utc::now()));

        f.tracker.initialize(Arc::clone(&position)).unwrap();
        f.tracker.test_short(dec!(0.1), dec!(120)).await.unwrap();

        assert_eq!(f.host.closed.lock().unwrap().len(), 1);
        assert_eq!(f.tracker.transition(), Transition::Initial);
    }

    #[tokio::test]
    async fn initialize_rejects_non_options() {
        let mut f = fixture(&[100], OptionRight::Call).await;
        let position = Arc::new(Position::new(
            PositionRecord::new("combo-XYZ", "XYZ"),
            Instrument::equity("XYZ"),
        ));
        assert!(matches!(
            f.tracker.initialize(position),
            Err(TradeError::NotAnOption(_))
        ));
    }
}
