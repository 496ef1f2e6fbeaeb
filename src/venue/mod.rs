//! Venue facade
//!
//! [`VenueApi`] is everything the live environment needs from the venue:
//! account and catalog fetches, candle history, trade placement, queries,
//! and push channels. [`ProtocolVenue`] implements it over the protocol
//! client.

mod lenient;
mod protocol_venue;

pub use lenient::{
    lenient_balance_update, lenient_balances, lenient_candle, lenient_candles, lenient_instruments,
    lenient_mood, lenient_position, lenient_profile,
};
pub use protocol_venue::ProtocolVenue;

use crate::config::AccountMode;
use crate::market::{Candle, Direction, Instrument, InstrumentId};
use crate::protocol::{ProtocolError, Reconnected, SessionState, SubscriptionKey};
use crate::state::Position;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

/// Venue facade errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VenueError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Reply was usable in no form at all
    #[error("Unusable venue reply: {0}")]
    Unusable(String),
}

/// Account profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: u64,
    #[serde(default)]
    pub name: Option<String>,
    pub currency: String,
}

/// One of the account's balances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub id: u64,
    pub mode: AccountMode,
    pub amount: Decimal,
    pub currency: String,
}

/// Trade placement request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRequest {
    pub balance_id: u64,
    pub instrument_id: InstrumentId,
    pub direction: Direction,
    pub invest: Decimal,
    pub expiration_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

/// Push channels the venue offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushChannel {
    Candles,
    Mood,
    Positions,
    Orders,
    Balances,
}

impl PushChannel {
    /// Push message name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            PushChannel::Candles => "candle-generated",
            PushChannel::Mood => "traders-mood-changed",
            PushChannel::Positions => "position-changed",
            PushChannel::Orders => "order-changed",
            PushChannel::Balances => "balance-changed",
        }
    }

    pub fn all() -> [PushChannel; 5] {
        [
            PushChannel::Candles,
            PushChannel::Mood,
            PushChannel::Positions,
            PushChannel::Orders,
            PushChannel::Balances,
        ]
    }
}

/// Query methods available to agents in both modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMethod {
    Positions,
    Orders,
    History,
    Balances,
    Instruments,
    Mood,
    Candles,
}

impl std::str::FromStr for QueryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positions" => Ok(QueryMethod::Positions),
            "orders" => Ok(QueryMethod::Orders),
            "history" => Ok(QueryMethod::History),
            "balances" => Ok(QueryMethod::Balances),
            "instruments" => Ok(QueryMethod::Instruments),
            "mood" => Ok(QueryMethod::Mood),
            "candles" => Ok(QueryMethod::Candles),
            other => Err(other.to_string()),
        }
    }
}

/// What the live environment consumes from the venue
#[async_trait]
pub trait VenueApi: Send + Sync {
    async fn profile(&self) -> Result<Profile, VenueError>;

    async fn balances(&self) -> Result<Vec<Balance>, VenueError>;

    async fn instruments(&self) -> Result<Vec<Instrument>, VenueError>;

    /// The last `count` candles ending at or before `to`
    async fn candles(
        &self,
        instrument_id: InstrumentId,
        period_seconds: u32,
        count: usize,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, VenueError>;

    /// Place a trade and return the opened position
    async fn place_trade(&self, request: &TradeRequest) -> Result<Position, VenueError>;

    async fn query(&self, method: QueryMethod, params: Value) -> Result<Value, VenueError>;

    /// Start a push subscription
    async fn subscribe(&self, channel: PushChannel, params: Value) -> Result<SubscriptionKey, VenueError>;

    /// Stop a push subscription. Returns false when it was not active.
    async fn unsubscribe(&self, key: &str) -> bool;

    /// Raw push payloads of one channel
    async fn pushes(&self, channel: PushChannel) -> mpsc::UnboundedReceiver<Value>;

    /// Notifications after the session was restored
    fn reconnects(&self) -> broadcast::Receiver<Reconnected>;

    /// Session state, used to notice a session that ended for good
    fn session(&self) -> watch::Receiver<SessionState>;
}
