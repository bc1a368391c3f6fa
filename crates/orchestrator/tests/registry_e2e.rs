//! End-to-end scenario: a fresh underlying with no persisted portfolios is
//! discovered, its aggregate portfolio and pivot levels are built from
//! trailing daily bars, a default strategy runs, the option chain populates
//! asynchronously, and the first qualifying signal produces exactly one
//! entry order.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use basket_trade_core::chart::{ChartBuffer, ChartSink};
use basket_trade_core::config::AppConfig;
use basket_trade_core::events::{Bar, Quote, Trade};
use basket_trade_core::instrument::OptionRight;
use basket_trade_core::option_name;
use basket_trade_core::portfolio::PortfolioRecord;
use basket_trade_core::traits::{
    ExecutionProvider, MarketData, MoneyManager, Persistence, PricingEngine,
};
use basket_trade_orchestrator::{Registry, Services};
use basket_trade_provider::{MemoryStore, RecordingPricingEngine, SimProvider, SimpleMoneyManager};

fn daily_bars(count: usize, close: Decimal) -> Vec<Bar> {
    let start = Utc::now() - chrono::Duration::days(count as i64);
    (0..count)
        .map(|i| Bar {
            open: close,
            high: close + dec!(2),
            low: close - dec!(2),
            close,
            volume: dec!(500000),
            timestamp: start + chrono::Duration::days(i as i64),
        })
        .collect()
}

async fn wait_until<F>(mut condition: F, what: &str)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread")]
async fn fresh_underlying_reaches_entry_submitted() {
    let sim = Arc::new(SimProvider::new());
    sim.register_equity("XYZ");
    // >= 200 trailing bars around a close of 100
    sim.set_daily_bars("XYZ", daily_bars(220, dec!(100)));

    let expiry = NaiveDate::from_ymd_opt(2026, 6, 19).unwrap();
    let option_symbols: Vec<String> = [90, 95, 100, 105, 110]
        .iter()
        .flat_map(|s| {
            [
                option_name("XYZ", expiry, Decimal::from(*s), OptionRight::Call),
                option_name("XYZ", expiry, Decimal::from(*s), OptionRight::Put),
            ]
        })
        .collect();
    sim.set_option_series("XYZ", option_symbols);

    let store = Arc::new(MemoryStore::new());
    let pricing = Arc::new(RecordingPricingEngine::new());
    let chart = Arc::new(ChartBuffer::new());
    let services = Services {
        market: Arc::clone(&sim) as Arc<dyn MarketData>,
        execution: Arc::clone(&sim) as Arc<dyn ExecutionProvider>,
        store: Arc::clone(&store) as Arc<dyn Persistence>,
        pricing: Arc::clone(&pricing) as Arc<dyn PricingEngine>,
        money: Arc::new(SimpleMoneyManager::new(10)) as Arc<dyn MoneyManager>,
        chart: Arc::clone(&chart) as Arc<dyn ChartSink>,
    };

    let mut config = AppConfig::default();
    config.registry.candidate_symbols = vec!["XYZ".to_string()];
    let registry = Registry::new(config, services, PortfolioRecord::basket("Master"));

    registry.load(Utc::now().date_naive(), false).await.unwrap();
    registry.await_load().await;

    // one aggregate portfolio, persisted and cached
    assert!(registry.portfolio_cached("portfolio-XYZ").await);
    assert!(store
        .portfolio_exists(&"portfolio-XYZ".to_string())
        .await
        .unwrap());

    // one default strategy running (in waiting until authorized)
    assert_eq!(registry.underlying_count().await, 1);
    assert!(registry.has_waiting_strategy("XYZ").await);
    assert!(pricing.has_watch("XYZ"));

    // the option chain populates asynchronously
    let mut expiries = Vec::new();
    for _ in 0..200 {
        expiries = registry.chain_expiries("XYZ").await;
        if !expiries.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(expiries, vec![expiry]);

    // first qualifying signal: a print above the pivot point
    sim.push_quote(
        "XYZ",
        Quote::new(dec!(100.95), dec!(101.05), 10, 10, Utc::now()),
    );
    sim.push_trade(
        "XYZ",
        Trade {
            price: dec!(101.00),
            size: dec!(500),
            timestamp: Utc::now(),
        },
    );

    // exactly one entry order reaches the broker
    let sim_for_wait = Arc::clone(&sim);
    wait_until(
        move || sim_for_wait.submitted_orders().len() == 1,
        "entry submission",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sim.submitted_orders().len(), 1);

    // the strategy moved from in-waiting to active under its combo id
    assert_eq!(registry.active_strategy_count("XYZ").await, 1);
    assert!(!registry.has_waiting_strategy("XYZ").await);

    // exactly one position and one combo portfolio were created
    assert!(registry.position_cached("combo-XYZ", "XYZ").await);
    assert_eq!(store.position_count().await, 1);
    assert_eq!(store.portfolio_count().await, 2); // aggregate + combo

    // the submit audit label was written
    assert_eq!(chart.labels_containing("LeS-").len(), 1);

    registry.shutdown().await;
}
