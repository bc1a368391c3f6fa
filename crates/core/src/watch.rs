//! Market-data handle for one instrument.

use std::sync::Arc;

use crate::events::{Quote, Trade};
use crate::instrument::Instrument;
use crate::subscription::Subscription;
use crate::traits::MarketData;

/// Couples an instrument with the market-data provider it is watched
/// through. Cloning shares the provider; subscriptions are per-call.
#[derive(Clone)]
pub struct Watch {
    instrument: Instrument,
    data: Arc<dyn MarketData>,
}

impl Watch {
    pub fn new(instrument: Instrument, data: Arc<dyn MarketData>) -> Self {
        Self { instrument, data }
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn name(&self) -> &str {
        &self.instrument.name
    }

    pub fn last_quote(&self) -> Option<Quote> {
        self.data.last_quote(&self.instrument.name)
    }

    pub fn subscribe_quotes(&self) -> Subscription<Quote> {
        self.data.subscribe_quotes(&self.instrument.name)
    }

    pub fn subscribe_trades(&self) -> Subscription<Trade> {
        self.data.subscribe_trades(&self.instrument.name)
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("instrument", &self.instrument.name)
            .finish()
    }
}
