//! Typed errors for cache and registry invariants.
//!
//! Invariant violations that were fatal assertions in earlier iterations are
//! recoverable `Result` errors here; `debug_assert!` remains only for
//! internal unreachable states.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::instrument::OptionRight;
use crate::portfolio::PortfolioId;

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("portfolio {0} already cached")]
    DuplicatePortfolio(PortfolioId),

    #[error("position {instrument} already cached under portfolio {portfolio}")]
    DuplicatePosition { portfolio: PortfolioId, instrument: String },

    #[error("portfolio {portfolio} references unknown owner {owner}")]
    UnknownOwner { portfolio: PortfolioId, owner: PortfolioId },

    #[error("unknown portfolio {0}")]
    UnknownPortfolio(PortfolioId),

    #[error("position {instrument} declares portfolio {declared} but the cache entry is {cached}")]
    PortfolioMismatch {
        instrument: String,
        declared: PortfolioId,
        cached: PortfolioId,
    },

    #[error("underlying {0} already has a strategy under construction")]
    StrategyInWaiting(String),

    #[error("underlying {0} is not loaded")]
    UnknownUnderlying(String),

    #[error("{0} order slot already occupied")]
    SlotOccupied(&'static str),

    #[error("execution provider cannot resolve a contract for {0}")]
    ProviderUnavailable(String),

    #[error("no resolved {right} strike near {price}")]
    NoSuchStrike { right: OptionRight, price: Decimal },

    #[error("instrument {0} is not an option")]
    NotAnOption(String),

    #[error("insufficient daily history for {symbol}: {got} bars")]
    InsufficientHistory { symbol: String, got: usize },
}
