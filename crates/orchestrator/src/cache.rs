//! StrategyCache: the in-memory index of persisted portfolios and positions.
//!
//! One mutual-exclusion domain per registry; any find-or-create sequence
//! must run under a single lock acquisition to keep concurrent resolution
//! callbacks from double-inserting the same logical key.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use basket_trade_core::errors::TradeError;
use basket_trade_core::portfolio::{PortfolioId, PortfolioKind, PortfolioRecord};
use basket_trade_core::position::Position;

/// Per-portfolio cache entry.
pub struct CacheEntry {
    pub portfolio: PortfolioRecord,
    /// Child combo portfolios keyed by id.
    pub combos: HashMap<PortfolioId, PortfolioRecord>,
    /// Positions keyed by instrument name.
    pub positions: HashMap<String, Arc<Position>>,
    /// Overnight positions under this portfolio have been scanned for
    /// re-activation.
    pub accessed: bool,
}

impl CacheEntry {
    fn new(portfolio: PortfolioRecord) -> Self {
        Self {
            portfolio,
            combos: HashMap::new(),
            positions: HashMap::new(),
            accessed: false,
        }
    }

    pub fn any_position_active(&self) -> bool {
        self.positions.values().any(|p| p.is_active())
    }
}

#[derive(Default)]
pub struct StrategyCache {
    entries: HashMap<PortfolioId, CacheEntry>,
}

impl StrategyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a portfolio. A duplicate id is logged and ignored; a combo
    /// whose owner is not yet cached is a data-corruption error.
    pub fn add_portfolio(&mut self, portfolio: PortfolioRecord) -> Result<bool, TradeError> {
        if self.entries.contains_key(&portfolio.id) {
            info!(id = %portfolio.id, "Portfolio already cached; add ignored");
            return Ok(false);
        }

        info!(
            id = %portfolio.id,
            kind = ?portfolio.kind,
            owner = portfolio.owner.as_deref().unwrap_or("-"),
            "Add portfolio"
        );

        if portfolio.kind.requires_owner() {
            let owner_id = portfolio.owner.clone().ok_or_else(|| TradeError::UnknownOwner {
                portfolio: portfolio.id.clone(),
                owner: String::new(),
            })?;
            let owner = self
                .entries
                .get_mut(&owner_id)
                .ok_or_else(|| TradeError::UnknownOwner {
                    portfolio: portfolio.id.clone(),
                    owner: owner_id.clone(),
                })?;
            owner.combos.insert(portfolio.id.clone(), portfolio.clone());
        }

        self.entries
            .insert(portfolio.id.clone(), CacheEntry::new(portfolio));
        Ok(true)
    }

    /// Insert a position under its declared portfolio. The declared id is
    /// cross-checked against the cache entry as a defense against data
    /// corruption.
    pub fn add_position(&mut self, position: Arc<Position>) -> Result<(), TradeError> {
        let record = position.record();
        info!(
            instrument = %record.instrument_name,
            quantity = %record.active_size,
            portfolio = %record.portfolio_id,
            notes = %record.notes,
            "Add position"
        );

        let entry = self
            .entries
            .get_mut(&record.portfolio_id)
            .ok_or_else(|| TradeError::UnknownPortfolio(record.portfolio_id.clone()))?;
        if entry.portfolio.id != record.portfolio_id {
            return Err(TradeError::PortfolioMismatch {
                instrument: record.instrument_name.clone(),
                declared: record.portfolio_id.clone(),
                cached: entry.portfolio.id.clone(),
            });
        }
        if entry.positions.contains_key(&record.instrument_name) {
            return Err(TradeError::DuplicatePosition {
                portfolio: record.portfolio_id,
                instrument: record.instrument_name,
            });
        }
        entry.positions.insert(record.instrument_name, position);
        Ok(())
    }

    pub fn entry(&self, id: &PortfolioId) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn portfolio(&self, id: &PortfolioId) -> Option<PortfolioRecord> {
        self.entries.get(id).map(|e| e.portfolio.clone())
    }

    pub fn find_position(&self, portfolio: &PortfolioId, instrument: &str) -> Option<Arc<Position>> {
        self.entries
            .get(portfolio)
            .and_then(|e| e.positions.get(instrument))
            .cloned()
    }

    pub fn mark_accessed(&mut self, id: &PortfolioId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.accessed = true;
        }
    }

    /// Underlying symbols carried over from a prior session: aggregate
    /// portfolios matching the id prefix, not yet scanned, holding at least
    /// one active position under themselves or their combos.
    pub fn carried_underlyings(&self, prefix: &str) -> Vec<String> {
        let mut symbols = Vec::new();
        for (id, entry) in &self.entries {
            if entry.accessed || !id.starts_with(prefix) {
                continue;
            }
            let symbol = &id[prefix.len()..];
            let active = entry.any_position_active()
                || entry.combos.keys().any(|combo| {
                    self.entries
                        .get(combo)
                        .is_some_and(CacheEntry::any_position_active)
                });
            if active {
                info!(portfolio = %id, symbol, "Carried-over underlying has active positions");
                symbols.push(symbol.to_string());
            }
        }
        symbols.sort();
        symbols
    }

    /// Combo portfolios under an aggregate, with their cached positions.
    pub fn combos_of(&self, id: &PortfolioId) -> Vec<(PortfolioId, Vec<Arc<Position>>)> {
        let Some(entry) = self.entries.get(id) else {
            return Vec::new();
        };
        let mut combos: Vec<(PortfolioId, Vec<Arc<Position>>)> = entry
            .combos
            .keys()
            .map(|combo| {
                let positions = self
                    .entries
                    .get(combo)
                    .map(|e| e.positions.values().cloned().collect())
                    .unwrap_or_default();
                (combo.clone(), positions)
            })
            .collect();
        combos.sort_by(|a, b| a.0.cmp(&b.0));
        combos
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
