//! Sensor and sensor item types

use crate::market::{Candle, InstrumentId};
use crate::state::Position;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of data a sensor buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Candle,
    Mood,
    Position,
    Order,
    Balance,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SensorKind::Candle => "candle",
            SensorKind::Mood => "mood",
            SensorKind::Position => "position",
            SensorKind::Order => "order",
            SensorKind::Balance => "balance",
        };
        f.write_str(s)
    }
}

/// Sensor identifier, derived from kind, instrument and period
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(String);

impl SensorId {
    /// Derive the id for a kind and its parameters
    pub fn derive(kind: SensorKind, params: &SensorParams) -> Self {
        match (kind, params.instrument_id, params.period_seconds) {
            (SensorKind::Candle, Some(inst), Some(period)) => Self(format!("candle:{inst}:{period}")),
            (SensorKind::Mood, Some(inst), _) => Self(format!("mood:{inst}")),
            (kind, _, _) => Self(kind.to_string()),
        }
    }

    pub fn candle(instrument_id: InstrumentId, period_seconds: u32) -> Self {
        Self(format!("candle:{instrument_id}:{period_seconds}"))
    }

    pub fn mood(instrument_id: InstrumentId) -> Self {
        Self(format!("mood:{instrument_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SensorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Sensor parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_id: Option<InstrumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<u32>,
}

/// A named, bounded, typed data buffer registration.
///
/// The id always derives from kind and params; an `id` arriving over the
/// wire is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SensorSpec")]
pub struct Sensor {
    pub id: SensorId,
    pub kind: SensorKind,
    #[serde(default)]
    pub params: SensorParams,
}

#[derive(Deserialize)]
struct SensorSpec {
    kind: SensorKind,
    #[serde(default)]
    params: SensorParams,
}

impl From<SensorSpec> for Sensor {
    fn from(spec: SensorSpec) -> Self {
        Sensor::new(spec.kind, spec.params)
    }
}

impl Sensor {
    pub fn new(kind: SensorKind, params: SensorParams) -> Self {
        Self {
            id: SensorId::derive(kind, &params),
            kind,
            params,
        }
    }

    /// Candles of one instrument and period
    pub fn candle(instrument_id: InstrumentId, period_seconds: u32) -> Self {
        Self::new(
            SensorKind::Candle,
            SensorParams {
                instrument_id: Some(instrument_id),
                period_seconds: Some(period_seconds),
            },
        )
    }

    /// Traders' mood for one instrument
    pub fn mood(instrument_id: InstrumentId) -> Self {
        Self::new(
            SensorKind::Mood,
            SensorParams {
                instrument_id: Some(instrument_id),
                period_seconds: None,
            },
        )
    }

    /// Same sensor with its id re-derived from kind and params
    pub fn normalized(self) -> Self {
        Self::new(self.kind, self.params)
    }

    pub fn position() -> Self {
        Self::new(SensorKind::Position, SensorParams::default())
    }

    pub fn order() -> Self {
        Self::new(SensorKind::Order, SensorParams::default())
    }

    pub fn balance() -> Self {
        Self::new(SensorKind::Balance, SensorParams::default())
    }
}

/// Share of traders betting on a rise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mood {
    pub instrument_id: InstrumentId,
    /// Fraction in [0, 1]
    pub value: Decimal,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub at: DateTime<Utc>,
}

/// Balance change push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub balance: Decimal,
    pub currency: String,
}

/// One buffered item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum SensorItem {
    Candle(Candle),
    Mood(Mood),
    Position(Position),
    /// Orders are kept as raw venue JSON
    Order(Value),
    Balance(BalanceUpdate),
}

impl SensorItem {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorItem::Candle(_) => SensorKind::Candle,
            SensorItem::Mood(_) => SensorKind::Mood,
            SensorItem::Position(_) => SensorKind::Position,
            SensorItem::Order(_) => SensorKind::Order,
            SensorItem::Balance(_) => SensorKind::Balance,
        }
    }

    /// Id of the sensor this item belongs to
    pub fn sensor_id(&self) -> SensorId {
        match self {
            SensorItem::Candle(c) => SensorId::candle(c.instrument_id, c.period_seconds),
            SensorItem::Mood(m) => SensorId::mood(m.instrument_id),
            other => SensorId::derive(other.kind(), &SensorParams::default()),
        }
    }

    pub fn as_candle(&self) -> Option<&Candle> {
        match self {
            SensorItem::Candle(c) => Some(c),
            _ => None,
        }
    }
}
