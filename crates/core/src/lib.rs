pub mod chart;
pub mod config;
pub mod config_loader;
pub mod errors;
pub mod events;
pub mod instrument;
pub mod order;
pub mod pivots;
pub mod portfolio;
pub mod position;
pub mod subscription;
pub mod traits;
pub mod watch;

pub use chart::{ChartBuffer, ChartSink, Label, PlSeries, TreeId};
pub use config::{AppConfig, BracketConfig, RegistryConfig, RollConfig};
pub use config_loader::ConfigLoader;
pub use errors::TradeError;
pub use events::{Bar, OrderEvent, Quote, Trade};
pub use instrument::{option_name, Instrument, InstrumentKind, OptionRight};
pub use order::{Order, OrderId, OrderSide, OrderStatus, OrderType};
pub use pivots::PivotSet;
pub use portfolio::{PortfolioId, PortfolioKind, PortfolioRecord};
pub use position::{Position, PositionRecord, PositionStats};
pub use subscription::{Subscription, SubscriptionGuard};
pub use traits::{
    ExecutionProvider, MarketData, MoneyManager, Persistence, PricingEngine, SeriesFilter,
};
pub use watch::Watch;
