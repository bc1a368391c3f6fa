//! Per-expiration strike ladder.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use basket_trade_core::errors::TradeError;
use basket_trade_core::instrument::{Instrument, OptionRight};

/// One resolved side of a strike: the provider symbol and its instrument.
#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub symbol: String,
    pub instrument: Instrument,
}

/// Call/put slots at one strike, populated independently as raw option
/// symbols resolve.
#[derive(Debug, Clone, Default)]
pub struct Strike {
    pub call: Option<ChainEntry>,
    pub put: Option<ChainEntry>,
}

impl Strike {
    fn side(&self, right: OptionRight) -> Option<&ChainEntry> {
        match right {
            OptionRight::Call => self.call.as_ref(),
            OptionRight::Put => self.put.as_ref(),
        }
    }
}

/// Strike ladder for one expiration date. Queries never synthesize strikes:
/// only strikes with a resolved instrument on the requested side are
/// returned.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    strikes: BTreeMap<Decimal, Strike>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the side slot at the entry's strike.
    pub fn set_entry(&mut self, strike: Decimal, right: OptionRight, entry: ChainEntry) {
        let slot = self.strikes.entry(strike).or_default();
        match right {
            OptionRight::Call => slot.call = Some(entry),
            OptionRight::Put => slot.put = Some(entry),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }

    pub fn strike_count(&self) -> usize {
        self.strikes.len()
    }

    fn resolved(&self, right: OptionRight) -> impl DoubleEndedIterator<Item = (Decimal, &ChainEntry)> {
        self.strikes
            .iter()
            .filter_map(move |(k, s)| s.side(right).map(|e| (*k, e)))
    }

    /// Nearest resolved strike to `price` on the requested side; ties go to
    /// the lower strike.
    pub fn atm(&self, price: Decimal, right: OptionRight) -> Option<Decimal> {
        self.resolved(right)
            .map(|(k, _)| k)
            .min_by_key(|k| ((*k - price).abs(), *k))
    }

    /// Greatest resolved call strike strictly below the underlying price:
    /// the strike just in the money for a call.
    pub fn call_itm(&self, price: Decimal) -> Option<Decimal> {
        self.resolved(OptionRight::Call)
            .map(|(k, _)| k)
            .filter(|k| *k < price)
            .next_back()
    }

    /// Least resolved put strike strictly above the underlying price: the
    /// strike just in the money for a put.
    pub fn put_itm(&self, price: Decimal) -> Option<Decimal> {
        self.resolved(OptionRight::Put)
            .map(|(k, _)| k)
            .find(|k| *k > price)
    }

    /// In-the-money strike for either side.
    pub fn itm(&self, price: Decimal, right: OptionRight) -> Option<Decimal> {
        match right {
            OptionRight::Call => self.call_itm(price),
            OptionRight::Put => self.put_itm(price),
        }
    }

    /// Provider symbol at an exact strike, requested side.
    pub fn symbol_at(&self, strike: Decimal, right: OptionRight) -> Result<&str, TradeError> {
        self.strikes
            .get(&strike)
            .and_then(|s| s.side(right))
            .map(|e| e.symbol.as_str())
            .ok_or(TradeError::NoSuchStrike { right, price: strike })
    }

    pub fn entry_at(&self, strike: Decimal, right: OptionRight) -> Option<&ChainEntry> {
        self.strikes.get(&strike).and_then(|s| s.side(right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn chain_with(calls: &[i64], puts: &[i64]) -> Chain {
        let expiry = NaiveDate::from_ymd_opt(2026, 6, 19).unwrap();
        let mut chain = Chain::new();
        for &k in calls {
            let strike = Decimal::from(k);
            let inst = Instrument::option("XYZ", expiry, strike, OptionRight::Call);
            chain.set_entry(
                strike,
                OptionRight::Call,
                ChainEntry { symbol: inst.name.clone(), instrument: inst },
            );
        }
        for &k in puts {
            let strike = Decimal::from(k);
            let inst = Instrument::option("XYZ", expiry, strike, OptionRight::Put);
            chain.set_entry(
                strike,
                OptionRight::Put,
                ChainEntry { symbol: inst.name.clone(), instrument: inst },
            );
        }
        chain
    }

    #[test]
    fn itm_skips_unresolved_sides() {
        // Calls resolved only at 95 and 105; puts at 100 and 110.
        let chain = chain_with(&[95, 105], &[100, 110]);

        // 104: the 100 strike has no call, so the call ITM lookup falls
        // through to 95.
        assert_eq!(chain.call_itm(dec!(104)), Some(dec!(95)));
        assert_eq!(chain.put_itm(dec!(104)), Some(dec!(110)));
        assert_eq!(chain.call_itm(dec!(90)), None);
    }

    #[test]
    fn atm_returns_nearest_resolved_strike() {
        let chain = chain_with(&[95, 100, 110], &[100]);
        assert_eq!(chain.atm(dec!(104), OptionRight::Call), Some(dec!(100)));
        assert_eq!(chain.atm(dec!(106), OptionRight::Call), Some(dec!(110)));
        // only one resolved put regardless of distance
        assert_eq!(chain.atm(dec!(150), OptionRight::Put), Some(dec!(100)));
        // tie at 105 goes to the lower strike
        assert_eq!(chain.atm(dec!(105), OptionRight::Call), Some(dec!(100)));
    }

    #[test]
    fn symbol_lookup_errors_on_missing_strike() {
        let chain = chain_with(&[100], &[]);
        assert!(chain.symbol_at(dec!(100), OptionRight::Call).is_ok());
        assert!(matches!(
            chain.symbol_at(dec!(100), OptionRight::Put),
            Err(TradeError::NoSuchStrike { .. })
        ));
    }

    #[test]
    fn overwrite_of_a_slot_is_allowed() {
        let mut chain = chain_with(&[100], &[]);
        let expiry = NaiveDate::from_ymd_opt(2026, 6, 19).unwrap();
        let inst = Instrument::option("XYZ", expiry, dec!(100), OptionRight::Call);
        chain.set_entry(
            dec!(100),
            OptionRight::Call,
            ChainEntry { symbol: "REPLACED".to_string(), instrument: inst },
        );
        assert_eq!(chain.symbol_at(dec!(100), OptionRight::Call).unwrap(), "REPLACED");
        assert_eq!(chain.strike_count(), 1);
    }
}
