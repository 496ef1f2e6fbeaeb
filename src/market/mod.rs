//! Market data types
//!
//! Candles, instruments and the JSON datasets the backtest replays

mod dataset;

pub use dataset::{Dataset, DatasetError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Venue instrument identifier
pub type InstrumentId = u32;

/// Direction of a binary option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Wins when the price closes above the open quote
    Call,
    /// Wins when the price closes below the open quote
    Put,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Call => write!(f, "call"),
            Direction::Put => write!(f, "put"),
        }
    }
}

/// One OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Instrument the candle belongs to
    pub instrument_id: InstrumentId,
    /// Candle length in seconds
    pub period_seconds: u32,
    /// Period start
    #[serde(with = "chrono::serde::ts_seconds")]
    pub period_start: DateTime<Utc>,
    /// Period end
    #[serde(with = "chrono::serde::ts_seconds")]
    pub period_end: DateTime<Utc>,
    pub open: Decimal,
    pub close: Decimal,
    pub low: Decimal,
    pub high: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// True when the close is above the open
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// True when the close is below the open
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// A tradable instrument from the venue catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub name: String,
    pub enabled: bool,
    pub suspended: bool,
    /// Payout rate applied to a winning stake, in percent
    pub profit_percent: Decimal,
    pub min_stake: Decimal,
    pub max_stake: Decimal,
    /// Trailing seconds before a period boundary in which entries are refused
    #[serde(default)]
    pub deadtime_seconds: u32,
    /// Allowed expiration durations
    #[serde(default)]
    pub expiration_seconds: Vec<u32>,
}

impl Instrument {
    /// Whether new trades may currently be opened on this instrument
    pub fn is_tradable(&self) -> bool {
        self.enabled && !self.suspended
    }
}
