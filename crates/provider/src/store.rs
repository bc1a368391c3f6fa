//! In-memory persistence store.
//!
//! Stands in for the database collaborator behind the `Persistence` trait;
//! seeded by tests and session bootstrap with previously-persisted
//! portfolios and positions.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use basket_trade_core::portfolio::{PortfolioId, PortfolioRecord};
use basket_trade_core::position::PositionRecord;
use basket_trade_core::traits::Persistence;

#[derive(Default)]
struct StoreInner {
    portfolios: HashMap<PortfolioId, PortfolioRecord>,
    positions: HashMap<(PortfolioId, String), PositionRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a persisted portfolio, as if loaded from a prior session.
    pub async fn seed_portfolio(&self, record: PortfolioRecord) {
        self.inner
            .lock()
            .await
            .portfolios
            .insert(record.id.clone(), record);
    }

    /// Seed a persisted position, as if loaded from a prior session.
    pub async fn seed_position(&self, record: PositionRecord) {
        self.inner.lock().await.positions.insert(
            (record.portfolio_id.clone(), record.instrument_name.clone()),
            record,
        );
    }

    pub async fn portfolio_count(&self) -> usize {
        self.inner.lock().await.portfolios.len()
    }

    pub async fn position_count(&self) -> usize {
        self.inner.lock().await.positions.len()
    }

    pub async fn portfolios(&self) -> Vec<PortfolioRecord> {
        self.inner.lock().await.portfolios.values().cloned().collect()
    }

    pub async fn positions(&self) -> Vec<PositionRecord> {
        self.inner.lock().await.positions.values().cloned().collect()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn portfolio_exists(&self, id: &PortfolioId) -> Result<bool> {
        Ok(self.inner.lock().await.portfolios.contains_key(id))
    }

    async fn get_portfolio(&self, id: &PortfolioId) -> Result<Option<PortfolioRecord>> {
        Ok(self.inner.lock().await.portfolios.get(id).cloned())
    }

    async fn construct_portfolio(&self, record: PortfolioRecord) -> Result<PortfolioRecord> {
        let mut inner = self.inner.lock().await;
        if inner.portfolios.contains_key(&record.id) {
            bail!("portfolio {} already persisted", record.id);
        }
        debug!(id = %record.id, kind = ?record.kind, "Persisted portfolio");
        inner.portfolios.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn construct_position(&self, record: PositionRecord) -> Result<PositionRecord> {
        let mut inner = self.inner.lock().await;
        let key = (record.portfolio_id.clone(), record.instrument_name.clone());
        if inner.positions.contains_key(&key) {
            bail!(
                "position {} already persisted under {}",
                record.instrument_name,
                record.portfolio_id
            );
        }
        debug!(
            portfolio = %record.portfolio_id,
            instrument = %record.instrument_name,
            "Persisted position"
        );
        inner.positions.insert(key, record.clone());
        Ok(record)
    }

    async fn update_position_notes(
        &self,
        portfolio: &PortfolioId,
        instrument: &str,
        notes: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = (portfolio.clone(), instrument.to_string());
        let Some(record) = inner.positions.get_mut(&key) else {
            bail!("notes update for unknown position {instrument} in {portfolio}");
        };
        record.notes = notes.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basket_trade_core::portfolio::PortfolioKind;

    #[tokio::test]
    async fn construct_then_lookup() {
        let store = MemoryStore::new();
        let record = PortfolioRecord::new(
            "portfolio-XYZ",
            Some("Master".to_string()),
            PortfolioKind::Aggregate,
            "Underlying Aggregate",
        );
        store.construct_portfolio(record.clone()).await.unwrap();

        assert!(store.portfolio_exists(&record.id).await.unwrap());
        assert_eq!(store.get_portfolio(&record.id).await.unwrap(), Some(record.clone()));
        assert!(store.construct_portfolio(record).await.is_err());
    }

    #[tokio::test]
    async fn notes_update_requires_existing_position() {
        let store = MemoryStore::new();
        let err = store
            .update_position_notes(&"portfolio-XYZ".to_string(), "XYZ", "note")
            .await;
        assert!(err.is_err());

        store
            .seed_position(PositionRecord::new("portfolio-XYZ", "XYZ"))
            .await;
        store
            .update_position_notes(&"portfolio-XYZ".to_string(), "XYZ", "note")
            .await
            .unwrap();
        assert_eq!(store.positions().await[0].notes, "note");
    }
}
