//! Venue facade over the protocol client

use super::lenient::{
    lenient_balances, lenient_candles, lenient_instruments, lenient_position, lenient_profile,
};
use super::{
    Balance, Profile, PushChannel, QueryMethod, TradeRequest, VenueApi, VenueError,
};
use crate::market::{Candle, Instrument, InstrumentId};
use crate::protocol::{ProtocolClient, Reconnected, SessionState, SubscriptionKey};
use crate::state::Position;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch};

const VERSION: &str = "1.0";

/// [`VenueApi`] speaking the venue's RPC names over a [`ProtocolClient`]
#[derive(Clone)]
pub struct ProtocolVenue {
    client: ProtocolClient,
}

impl ProtocolVenue {
    pub fn new(client: ProtocolClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    async fn call(&self, name: &str, body: Value) -> Result<Value, VenueError> {
        Ok(self.client.send(name, VERSION, body).await?)
    }
}

fn rpc_name(method: QueryMethod) -> &'static str {
    match method {
        QueryMethod::Positions => "get-positions",
        QueryMethod::Orders => "get-orders",
        QueryMethod::History => "get-position-history",
        QueryMethod::Balances => "get-balances",
        QueryMethod::Instruments => "get-instruments",
        QueryMethod::Mood => "get-traders-mood",
        QueryMethod::Candles => "get-candles",
    }
}

#[async_trait]
impl VenueApi for ProtocolVenue {
    async fn profile(&self) -> Result<Profile, VenueError> {
        let raw = self.call("get-profile", json!({})).await?;
        lenient_profile(&raw).ok_or_else(|| VenueError::Unusable("profile without user id".into()))
    }

    async fn balances(&self) -> Result<Vec<Balance>, VenueError> {
        let raw = self.call("get-balances", json!({})).await?;
        Ok(lenient_balances(&raw))
    }

    async fn instruments(&self) -> Result<Vec<Instrument>, VenueError> {
        let raw = self.call("get-instruments", json!({ "type": "blitz" })).await?;
        Ok(lenient_instruments(&raw))
    }

    async fn candles(
        &self,
        instrument_id: InstrumentId,
        period_seconds: u32,
        count: usize,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, VenueError> {
        let raw = self
            .call(
                "get-candles",
                json!({
                    "active_id": instrument_id,
                    "size": period_seconds,
                    "count": count,
                    "to": to.timestamp(),
                }),
            )
            .await?;
        Ok(lenient_candles(&raw))
    }

    async fn place_trade(&self, request: &TradeRequest) -> Result<Position, VenueError> {
        let raw = self
            .call(
                "open-option",
                json!({
                    "user_balance_id": request.balance_id,
                    "active_id": request.instrument_id,
                    "direction": request.direction,
                    "price": request.invest,
                    "value": request.price,
                    "expired": request.expiration_time.timestamp(),
                    "option_type": "blitz",
                }),
            )
            .await?;
        lenient_position(&raw)
            .ok_or_else(|| VenueError::Unusable("trade reply without a position".into()))
    }

    async fn query(&self, method: QueryMethod, params: Value) -> Result<Value, VenueError> {
        self.call(rpc_name(method), params).await
    }

    async fn subscribe(&self, channel: PushChannel, params: Value) -> Result<SubscriptionKey, VenueError> {
        Ok(self.client.subscribe(channel.name(), VERSION, params).await?)
    }

    async fn unsubscribe(&self, key: &str) -> bool {
        self.client.unsubscribe(key).await
    }

    async fn pushes(&self, channel: PushChannel) -> mpsc::UnboundedReceiver<Value> {
        let mut events = self.client.events(channel.name()).await;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(event.msg).is_err() {
                    break;
                }
            }
        });
        rx
    }

    fn reconnects(&self) -> broadcast::Receiver<Reconnected> {
        self.client.reconnects()
    }

    fn session(&self) -> watch::Receiver<SessionState> {
        self.client.session()
    }
}
