//! Option chain aggregation for one underlying.
//!
//! Chains populate incrementally as raw option symbols resolve against the
//! provider; queries are served from whatever has resolved so far.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use basket_trade_core::instrument::Instrument;
use basket_trade_core::traits::{MarketData, SeriesFilter};
use basket_trade_core::watch::Watch;

use crate::chain::{Chain, ChainEntry};

/// Per-expiration chains for one underlying.
pub struct Aggregate {
    underlying: Watch,
    chains: BTreeMap<NaiveDate, Chain>,
}

impl Aggregate {
    pub fn new(underlying: Watch) -> Self {
        Self {
            underlying,
            chains: BTreeMap::new(),
        }
    }

    pub fn underlying(&self) -> &Watch {
        &self.underlying
    }

    /// File a resolved option into its expiry's ladder, creating the ladder
    /// on first sight. Population of an occupied slot overwrites. A
    /// non-option instrument is a naming-lookup failure: logged, skipped.
    pub fn insert_option(&mut self, instrument: Instrument) {
        let (expiry, strike, right) =
            match (instrument.expiry(), instrument.strike(), instrument.right()) {
                (Some(expiry), Some(strike), Some(right)) => (expiry, strike, right),
                _ => {
                    warn!(name = %instrument.name, "Chain load skipped non-option instrument");
                    return;
                }
            };

        let chain = match self.chains.get_mut(&expiry) {
            Some(chain) => chain,
            None => {
                info!(
                    underlying = %self.underlying.name(),
                    %expiry,
                    "Add chain"
                );
                self.chains.entry(expiry).or_default()
            }
        };
        chain.set_entry(
            strike,
            right,
            ChainEntry {
                symbol: instrument.name.clone(),
                instrument,
            },
        );
    }

    pub fn chain(&self, expiry: NaiveDate) -> Option<&Chain> {
        self.chains.get(&expiry)
    }

    pub fn expiries(&self) -> Vec<NaiveDate> {
        self.chains.keys().copied().collect()
    }

    /// Earliest expiry on or after the given date.
    pub fn nearest_expiry(&self, on_or_after: NaiveDate) -> Option<NaiveDate> {
        self.chains.keys().find(|e| **e >= on_or_after).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// Stream the underlying's option series through the resolver into the
/// aggregate. Individual resolution failures are logged and skipped; the
/// count of options filed is returned.
pub async fn load_chains(
    aggregate: &Arc<RwLock<Aggregate>>,
    data: &Arc<dyn MarketData>,
    filter: &SeriesFilter,
) -> Result<usize> {
    let underlying_name = aggregate.read().await.underlying().name().to_string();
    let symbols = data.option_series(&underlying_name, filter).await?;
    debug!(underlying = %underlying_name, count = symbols.len(), "Loading chains");

    let mut loaded = 0;
    for symbol in symbols {
        match data.resolve_instrument(&symbol).await {
            Ok(instrument) => {
                aggregate.write().await.insert_option(instrument);
                loaded += 1;
            }
            Err(e) => {
                warn!(symbol, error = %e, "Option resolution failed during chain load");
            }
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use basket_trade_core::instrument::OptionRight;
    use basket_trade_core::option_name;
    use basket_trade_provider::SimProvider;

    fn watch(provider: &Arc<SimProvider>) -> Watch {
        provider.register_equity("XYZ");
        Watch::new(
            Instrument::equity("XYZ"),
            Arc::clone(provider) as Arc<dyn MarketData>,
        )
    }

    #[test]
    fn inserts_group_by_expiry() {
        let provider = Arc::new(SimProvider::new());
        let mut aggregate = Aggregate::new(watch(&provider));
        let june = NaiveDate::from_ymd_opt(2026, 6, 19).unwrap();
        let july = NaiveDate::from_ymd_opt(2026, 7, 17).unwrap();

        aggregate.insert_option(Instrument::option("XYZ", june, dec!(100), OptionRight::Call));
        aggregate.insert_option(Instrument::option("XYZ", june, dec!(100), OptionRight::Put));
        aggregate.insert_option(Instrument::option("XYZ", july, dec!(105), OptionRight::Call));
        // non-option is logged and skipped
        aggregate.insert_option(Instrument::equity("XYZ"));

        assert_eq!(aggregate.expiries(), vec![june, july]);
        assert_eq!(aggregate.chain(june).unwrap().strike_count(), 1);
        assert_eq!(aggregate.nearest_expiry(june), Some(june));
        assert_eq!(
            aggregate.nearest_expiry(june + chrono::Duration::days(1)),
            Some(july)
        );
    }

    #[tokio::test]
    async fn load_chains_resolves_the_series() {
        let provider = Arc::new(SimProvider::new());
        let aggregate = Arc::new(RwLock::new(Aggregate::new(watch(&provider))));
        let expiry = NaiveDate::from_ymd_opt(2026, 6, 19).unwrap();

        let mut symbols: Vec<String> = [95, 100, 105]
            .iter()
            .map(|s| option_name("XYZ", expiry, Decimal::from(*s), OptionRight::Call))
            .collect();
        symbols.push("NOT-A-SYMBOL".to_string());
        provider.set_option_series("XYZ", symbols);

        let data: Arc<dyn MarketData> = Arc::clone(&provider) as Arc<dyn MarketData>;
        let loaded = load_chains(&aggregate, &data, &SeriesFilter::default())
            .await
            .unwrap();

        assert_eq!(loaded, 3);
        let aggregate = aggregate.read().await;
        let chain = aggregate.chain(expiry).unwrap();
        assert_eq!(chain.strike_count(), 3);
        assert_eq!(chain.call_itm(dec!(101)), Some(dec!(100)));
    }
}
