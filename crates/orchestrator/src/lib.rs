//! Portfolio/strategy orchestration: the StrategyCache, order lifecycle
//! tracking, bracket orders, strategy actors, and the registry entry point.

pub mod bracket;
pub mod cache;
pub mod registry;
pub mod strategy;
pub mod track_order;

pub use bracket::{BracketEntry, BracketSlot, BracketSpec, BracketState, EntryMethod, ProfitMethod, StopMethod};
pub use cache::{CacheEntry, StrategyCache};
pub use registry::{Registry, Services};
pub use strategy::{
    InstanceEvent, StrategyActor, StrategyCommand, StrategyHandle, StrategyHost, StrategyInstance,
    StrategyParams,
};
pub use track_order::{OrderArgs, TrackOrder, TradeState};
