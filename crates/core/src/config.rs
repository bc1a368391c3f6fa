//! Runtime configuration with serde defaults matching the historical
//! compile-time constants.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub roll: RollConfig,
    #[serde(default)]
    pub bracket: BracketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Statically configured candidate underlyings, unioned with carried-over
    /// symbols discovered in the persisted portfolio cache.
    pub candidate_symbols: Vec<String>,
    /// Id prefix marking per-underlying aggregate portfolios.
    pub underlying_prefix: String,
    /// Trailing daily bars fetched for pivot computation.
    pub daily_bar_count: usize,
    /// Default order size for a strategy's entry.
    pub default_order_size: Decimal,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            candidate_symbols: vec!["SPY".to_string(), "SLV".to_string(), "GLD".to_string()],
            underlying_prefix: "portfolio-".to_string(),
            daily_bar_count: 200,
            default_order_size: Decimal::from(100),
        }
    }
}

/// Option-roll economics. Defaults preserve the long-standing thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollConfig {
    /// Minimum per-share profit a roll must clear, net of spreads and
    /// commission, before it triggers.
    pub min_roll_profit: Decimal,
    /// Estimated commissions plus spare change, per share.
    pub commission_allowance: Decimal,
    /// A short leg is closed outright once its ask falls to this level.
    pub short_close_ask: Decimal,
}

impl Default for RollConfig {
    fn default() -> Self {
        Self {
            min_roll_profit: Decimal::new(10, 2),       // 0.10
            commission_allowance: Decimal::new(10, 2),  // 0.10
            short_close_ask: Decimal::new(101, 3),      // 0.101
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketConfig {
    /// A trailing stop only updates the live order when the improvement
    /// exceeds this band.
    pub trail_dead_band: Decimal,
    /// Good-till duration applied to limit entries, seconds.
    pub entry_duration_secs: i64,
}

impl Default for BracketConfig {
    fn default() -> Self {
        Self {
            trail_dead_band: Decimal::ZERO,
            entry_duration_secs: 30,
        }
    }
}
