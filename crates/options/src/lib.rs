//! Option chain aggregation and roll tracking.

pub mod aggregate;
pub mod chain;
pub mod tracker;

pub use aggregate::{load_chains, Aggregate};
pub use chain::{Chain, ChainEntry, Strike};
pub use tracker::{RollHost, Tracker, Transition};
