//! Backtesting module
//!
//! Replays candle datasets against an agent with the same environment
//! interface the live venue presents, settling trades on a simulated clock.

mod analytics;
mod replay;
mod settlement;
mod simulator;

pub use analytics::{BacktestReport, BacktestSummary};
pub use replay::Timeline;
pub use settlement::{PendingTrade, Settlement};
pub use simulator::BacktestEnvironment;

use crate::config::BacktestSettings;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Backtest configuration
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Starting wallet balance
    pub initial_balance: Decimal,
    /// Payout applied to winning trades, in percent
    pub profit_percent: Decimal,
    /// Smallest accepted stake
    pub min_stake: Decimal,
    /// Capacity of every sensor buffer
    pub buffer_capacity: usize,
    /// Fixed run id for reproducible event logs; random when absent
    pub run_id: Option<String>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(1000),
            profit_percent: dec!(85),
            min_stake: Decimal::ONE,
            buffer_capacity: crate::sensor::DEFAULT_CAPACITY,
            run_id: None,
        }
    }
}

impl From<&BacktestSettings> for BacktestConfig {
    fn from(settings: &BacktestSettings) -> Self {
        Self {
            initial_balance: settings.initial_balance,
            profit_percent: settings.profit_percent,
            min_stake: settings.min_stake,
            buffer_capacity: settings.buffer_capacity,
            run_id: None,
        }
    }
}
