//! Trading event taxonomy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed set of trading event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "trade:placed")]
    TradePlaced,
    #[serde(rename = "trade:closed")]
    TradeClosed,
    #[serde(rename = "position:changed")]
    PositionChanged,
    #[serde(rename = "wallet:changed")]
    WalletChanged,
    #[serde(rename = "agent:signal")]
    AgentSignal,
    #[serde(rename = "agent:debug")]
    AgentDebug,
    #[serde(rename = "run:started")]
    RunStarted,
    #[serde(rename = "run:stopped")]
    RunStopped,
    #[serde(rename = "action:executed")]
    ActionExecuted,
    #[serde(rename = "action:failed")]
    ActionFailed,
    #[serde(rename = "reconnect")]
    Reconnect,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TradePlaced => "trade:placed",
            EventType::TradeClosed => "trade:closed",
            EventType::PositionChanged => "position:changed",
            EventType::WalletChanged => "wallet:changed",
            EventType::AgentSignal => "agent:signal",
            EventType::AgentDebug => "agent:debug",
            EventType::RunStarted => "run:started",
            EventType::RunStopped => "run:stopped",
            EventType::ActionExecuted => "action:executed",
            EventType::ActionFailed => "action:failed",
            EventType::Reconnect => "reconnect",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One appended trading event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingEvent {
    pub run_id: String,
    /// Emission order within the run
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}
