//! Money-manager authorization gate.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use basket_trade_core::instrument::Instrument;
use basket_trade_core::order::Order;
use basket_trade_core::portfolio::PortfolioRecord;
use basket_trade_core::position::Position;
use basket_trade_core::traits::MoneyManager;

/// Authorizes up to a fixed number of distinct instrument names. Repeat
/// requests for an already-authorized name always pass, so a strategy that
/// re-checks after restart is not double-counted.
pub struct SimpleMoneyManager {
    max_names: usize,
    authorized: Mutex<HashSet<String>>,
}

impl SimpleMoneyManager {
    pub fn new(max_names: usize) -> Self {
        Self {
            max_names,
            authorized: Mutex::new(HashSet::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.authorized.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn authorized_count(&self) -> usize {
        self.lock().len()
    }
}

impl Default for SimpleMoneyManager {
    fn default() -> Self {
        Self::new(10)
    }
}

impl MoneyManager for SimpleMoneyManager {
    fn authorize(&self, name: &str) -> bool {
        let mut authorized = self.lock();
        if authorized.contains(name) {
            return true;
        }
        if authorized.len() < self.max_names {
            authorized.insert(name.to_string());
            debug!(name, total = authorized.len(), "Authorized");
            true
        } else {
            warn!(name, max = self.max_names, "Authorization denied; at capacity");
            false
        }
    }

    fn authorize_underlying(
        &self,
        _order: &Order,
        position: &Position,
        _portfolio: &PortfolioRecord,
    ) -> bool {
        self.authorize(&position.instrument().name)
    }

    fn authorize_option(
        &self,
        _order: &Order,
        _position: &Position,
        _portfolio: &PortfolioRecord,
        instrument: &Instrument,
    ) -> bool {
        self.authorize(&instrument.name)
    }
}
