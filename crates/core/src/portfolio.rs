//! Portfolio records: the persisted 4-level hierarchy.

use serde::{Deserialize, Serialize};

pub type PortfolioId = String;

/// Node type in the strict hierarchy:
/// `Basket` (root) → `Aggregate` (per underlying) → `Standard` (per
/// discretionary strategy) → `MultiLeggedPosition` (per concrete combo).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortfolioKind {
    Basket,
    Aggregate,
    Standard,
    MultiLeggedPosition,
}

impl PortfolioKind {
    /// Combo-level nodes must be associated with an existing owner.
    pub fn requires_owner(self) -> bool {
        matches!(self, Self::Aggregate | Self::MultiLeggedPosition)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRecord {
    pub id: PortfolioId,
    pub owner: Option<PortfolioId>,
    pub kind: PortfolioKind,
    pub currency: String,
    pub description: String,
}

impl PortfolioRecord {
    pub fn new(
        id: impl Into<PortfolioId>,
        owner: Option<PortfolioId>,
        kind: PortfolioKind,
        description: &str,
    ) -> Self {
        Self {
            id: id.into(),
            owner,
            kind,
            currency: "USD".to_string(),
            description: description.to_string(),
        }
    }

    /// Root basket portfolio.
    pub fn basket(id: impl Into<PortfolioId>) -> Self {
        Self::new(id, None, PortfolioKind::Basket, "Master")
    }
}
