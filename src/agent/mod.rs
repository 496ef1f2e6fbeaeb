//! Agent contract
//!
//! Strategies implement [`Agent`] and run unmodified against a live venue
//! or a backtest replay, since both present the same environment.

mod context;
pub mod strategies;

pub use context::AgentContext;

use crate::market::{Candle, Direction, Instrument, InstrumentId};
use crate::sensor::{Sensor, SensorId, SensorItem};
use crate::state::{EnvironmentSnapshot, Position};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Abstract action returned by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    /// Open a binary option
    Trade {
        instrument_id: InstrumentId,
        direction: Direction,
        invest: Decimal,
        expiration_seconds: u32,
        /// Open quote override; the latest known price otherwise
        #[serde(default, skip_serializing_if = "Option::is_none")]
        price: Option<Decimal>,
    },
    Subscribe {
        sensor: Sensor,
    },
    Unsubscribe {
        sensor_id: SensorId,
    },
    Query {
        method: String,
        #[serde(default)]
        params: Value,
    },
}

/// Action discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Trade,
    Subscribe,
    Unsubscribe,
    Query,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::Trade => "trade",
            ActionKind::Subscribe => "subscribe",
            ActionKind::Unsubscribe => "unsubscribe",
            ActionKind::Query => "query",
        };
        f.write_str(s)
    }
}

impl Action {
    pub fn trade(
        instrument_id: InstrumentId,
        direction: Direction,
        invest: Decimal,
        expiration_seconds: u32,
    ) -> Self {
        Action::Trade {
            instrument_id,
            direction,
            invest,
            expiration_seconds,
            price: None,
        }
    }

    pub fn subscribe(sensor: Sensor) -> Self {
        Action::Subscribe { sensor }
    }

    pub fn unsubscribe(sensor_id: SensorId) -> Self {
        Action::Unsubscribe { sensor_id }
    }

    pub fn query(method: impl Into<String>, params: Value) -> Self {
        Action::Query {
            method: method.into(),
            params,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Trade { .. } => ActionKind::Trade,
            Action::Subscribe { .. } => ActionKind::Subscribe,
            Action::Unsubscribe { .. } => ActionKind::Unsubscribe,
            Action::Query { .. } => ActionKind::Query,
        }
    }
}

/// Point-in-time view handed to the agent once per update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub sensors: BTreeMap<SensorId, Vec<SensorItem>>,
    pub state: EnvironmentSnapshot,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn sensor(&self, id: &SensorId) -> &[SensorItem] {
        self.sensors.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Candles buffered for a candle sensor, oldest first
    pub fn candles(&self, id: &SensorId) -> Vec<&Candle> {
        self.sensor(id).iter().filter_map(SensorItem::as_candle).collect()
    }

    /// Whether any position on `instrument_id` is open
    pub fn has_open_position(&self, instrument_id: InstrumentId) -> bool {
        self.state
            .open_positions
            .iter()
            .any(|p| p.instrument_id == instrument_id)
    }
}

/// Whether the environment trades against a venue or replays a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Live,
    Backtest,
}

/// Environment description passed to [`Agent::initialize`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentInfo {
    pub mode: RunMode,
    pub balance: Decimal,
    /// Smallest stake accepted by any tradable instrument
    pub min_stake: Decimal,
    pub instruments: Vec<Instrument>,
    pub start_time: DateTime<Utc>,
}

/// A trading strategy
pub trait Agent: Send {
    /// Label used in logs
    fn name(&self) -> &str;

    /// Called once before the first observation; returned actions run
    /// before any data is replayed or streamed
    fn initialize(&mut self, _env: &EnvironmentInfo, _ctx: &AgentContext) -> Vec<Action> {
        Vec::new()
    }

    /// Called after every sensor update
    fn on_observation(&mut self, observation: &Observation, ctx: &AgentContext) -> Vec<Action>;

    /// Called exactly once per closed position
    fn on_trade_result(&mut self, _position: &Position, _ctx: &AgentContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_action_serde_tagging() {
        let action = Action::trade(76, Direction::Call, dec!(20), 60);
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "trade");
        assert_eq!(value["direction"], "call");
        assert!(value.get("price").is_none());

        let parsed: Action = serde_json::from_value(json!({
            "type": "unsubscribe",
            "sensor_id": "candle:1:60"
        }))
        .unwrap();
        assert_eq!(parsed, Action::unsubscribe(SensorId::candle(1, 60)));
        assert_eq!(parsed.kind(), ActionKind::Unsubscribe);
    }

    #[test]
    fn test_observation_lookup_of_missing_sensor() {
        let observation = Observation {
            sensors: BTreeMap::new(),
            state: EnvironmentSnapshot::default(),
            timestamp: Utc::now(),
        };
        assert!(observation.sensor(&SensorId::mood(1)).is_empty());
        assert!(!observation.has_open_position(1));
    }
}
