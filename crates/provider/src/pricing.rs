//! Pricing-engine registration stand-in.
//!
//! The numeric Greeks engine is an opaque collaborator; this implementation
//! records registrations and active pairs so the orchestration flow can be
//! verified without a calculation backend.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use basket_trade_core::instrument::Instrument;
use basket_trade_core::traits::PricingEngine;

#[derive(Default)]
struct EngineInner {
    watches: HashSet<String>,
    options: HashSet<String>,
    active: HashSet<(String, String)>,
}

#[derive(Default)]
pub struct RecordingPricingEngine {
    inner: Mutex<EngineInner>,
}

impl RecordingPricingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn watch_count(&self) -> usize {
        self.lock().watches.len()
    }

    pub fn option_count(&self) -> usize {
        self.lock().options.len()
    }

    pub fn has_watch(&self, name: &str) -> bool {
        self.lock().watches.contains(name)
    }

    pub fn is_pair_active(&self, option: &str, underlying: &str) -> bool {
        self.lock()
            .active
            .contains(&(option.to_string(), underlying.to_string()))
    }
}

impl PricingEngine for RecordingPricingEngine {
    fn register_watch(&self, instrument: &Instrument) {
        debug!(name = %instrument.name, "Registered watch with pricing engine");
        self.lock().watches.insert(instrument.name.clone());
    }

    fn register_option(&self, instrument: &Instrument) {
        debug!(name = %instrument.name, "Registered option with pricing engine");
        self.lock().options.insert(instrument.name.clone());
    }

    fn start_greeks(&self, option: &Instrument, underlying: &Instrument) {
        self.lock()
            .active
            .insert((option.name.clone(), underlying.name.clone()));
    }

    fn stop_greeks(&self, option: &Instrument, underlying: &Instrument) {
        self.lock()
            .active
            .remove(&(option.name.clone(), underlying.name.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use basket_trade_core::instrument::OptionRight;

    #[test]
    fn greeks_pairs_start_and_stop() {
        let engine = RecordingPricingEngine::new();
        let underlying = Instrument::equity("XYZ");
        let option = Instrument::option(
            "XYZ",
            NaiveDate::from_ymd_opt(2026, 6, 19).unwrap(),
            dec!(100),
            OptionRight::Call,
        );

        engine.register_watch(&underlying);
        engine.register_option(&option);
        engine.start_greeks(&option, &underlying);
        assert!(engine.is_pair_active(&option.name, "XYZ"));

        engine.stop_greeks(&option, &underlying);
        assert!(!engine.is_pair_active(&option.name, "XYZ"));
        assert_eq!(engine.watch_count(), 1);
    }
}
