//! Live trading environment

use super::{
    check_stake, emit_trade_closed, emit_trade_placed, emit_wallet_changed, min_stake,
    record_result, ActionError, ActionResult, TradingEnvironment,
};
use crate::agent::{Action, Agent, AgentContext, EnvironmentInfo, Observation, RunMode};
use crate::config::{AccountMode, TradingConfig};
use crate::events::{EventBus, EventType};
use crate::market::{Direction, Instrument, InstrumentId};
use crate::protocol::{SessionState, SubscriptionKey};
use crate::sensor::{BalanceUpdate, Sensor, SensorId, SensorItem, SensorKind, SensorManager};
use crate::state::{EnvironmentSnapshot, EnvironmentState, Position, PositionChange, PositionId, Wallet};
use crate::venue::{
    lenient_balance_update, lenient_candle, lenient_mood, lenient_position, PushChannel,
    QueryMethod, TradeRequest, VenueApi,
};
use anyhow::Context;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Live environment settings
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub account_mode: AccountMode,
    pub buffer_capacity: usize,
    pub min_stake_floor: Decimal,
}

impl From<&TradingConfig> for LiveConfig {
    fn from(config: &TradingConfig) -> Self {
        Self {
            account_mode: config.account_mode,
            buffer_capacity: config.buffer_capacity,
            min_stake_floor: config.min_stake_floor,
        }
    }
}

/// Stops a running [`LiveEnvironment::run_agent`] loop
#[derive(Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

/// Push receivers, consumed by the run loop
struct PushStreams {
    candles: mpsc::UnboundedReceiver<Value>,
    moods: mpsc::UnboundedReceiver<Value>,
    positions: mpsc::UnboundedReceiver<Value>,
    orders: mpsc::UnboundedReceiver<Value>,
    balances: mpsc::UnboundedReceiver<Value>,
}

/// Trading environment backed by a venue.
///
/// The run loop is the single consumer of every push receiver and the only
/// mutator of state and sensor buffers.
pub struct LiveEnvironment<V: VenueApi> {
    venue: V,
    config: LiveConfig,
    bus: EventBus,
    state: EnvironmentState,
    wallet: Wallet,
    sensors: SensorManager,
    updates: mpsc::UnboundedReceiver<SensorId>,
    streams: Option<PushStreams>,
    info: Option<EnvironmentInfo>,
    balance_id: Option<u64>,
    user_id: Option<u64>,
    min_stake: Decimal,
    sensor_keys: HashMap<SensorId, SubscriptionKey>,
    reported: HashSet<PositionId>,
    halted: Arc<AtomicBool>,
    stop: Arc<watch::Sender<bool>>,
}

impl<V: VenueApi> LiveEnvironment<V> {
    pub fn new(venue: V, config: LiveConfig, bus: EventBus) -> Self {
        let (update_tx, updates) = mpsc::unbounded_channel();
        let mut sensors = SensorManager::new(config.buffer_capacity);
        sensors.on_update(move |id, _| {
            let _ = update_tx.send(id.clone());
        });
        let (stop, _) = watch::channel(false);
        let min_stake = config.min_stake_floor;

        Self {
            venue,
            config,
            bus,
            state: EnvironmentState::default(),
            wallet: Wallet::new(Decimal::ZERO),
            sensors,
            updates,
            streams: None,
            info: None,
            balance_id: None,
            user_id: None,
            min_stake,
            sensor_keys: HashMap::new(),
            reported: HashSet::new(),
            halted: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(stop),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn sensors(&self) -> &SensorManager {
        &self.sensors
    }

    /// Replace the wallet, arming the bust callback
    fn arm_wallet(&mut self, balance: Decimal) {
        let mut wallet = Wallet::new(balance);
        let halted = self.halted.clone();
        wallet.on_bust(move |balance| {
            tracing::error!(%balance, "Wallet bust, halting run");
            halted.store(true, Ordering::SeqCst);
        });
        self.wallet = wallet;
    }

    fn context(&self, agent: &str) -> AgentContext {
        let view = self.wallet.view(
            self.state.total_pnl(),
            self.state.drawdown(),
            self.state.max_drawdown(),
        );
        AgentContext::new(self.bus.clone(), view, agent)
    }

    async fn execute_one(&mut self, action: &Action) -> Result<Value, ActionError> {
        match action {
            Action::Trade {
                instrument_id,
                direction,
                invest,
                expiration_seconds,
                price,
            } => {
                self.place_trade(*instrument_id, *direction, *invest, *expiration_seconds, *price)
                    .await
            }
            Action::Subscribe { sensor } => self.subscribe_sensor(sensor.clone()).await,
            Action::Unsubscribe { sensor_id } => self.unsubscribe_sensor(sensor_id).await,
            Action::Query { method, params } => {
                let method: QueryMethod = method.parse().map_err(ActionError::UnknownQueryMethod)?;
                self.venue
                    .query(method, params.clone())
                    .await
                    .map_err(|e| ActionError::Venue(e.to_string()))
            }
        }
    }

    async fn place_trade(
        &mut self,
        instrument_id: InstrumentId,
        direction: Direction,
        invest: Decimal,
        expiration_seconds: u32,
        price: Option<Decimal>,
    ) -> Result<Value, ActionError> {
        let instrument = self
            .state
            .instruments()
            .iter()
            .find(|i| i.id == instrument_id)
            .cloned()
            .ok_or(ActionError::UnknownInstrument(instrument_id))?;
        check_stake(&instrument, invest, self.config.min_stake_floor)?;
        if !self.wallet.can_afford(invest) {
            return Err(ActionError::InsufficientFunds {
                balance: self.wallet.balance(),
                required: invest,
            });
        }
        let balance_id = self
            .balance_id
            .ok_or_else(|| ActionError::Venue("environment not initialized".to_string()))?;

        let request = TradeRequest {
            balance_id,
            instrument_id,
            direction,
            invest,
            expiration_time: self.bus.clock().now()
                + chrono::Duration::seconds(i64::from(expiration_seconds)),
            price,
        };
        let position = self
            .venue
            .place_trade(&request)
            .await
            .map_err(|e| ActionError::Venue(e.to_string()))?;

        // local mirror until the venue's balance push arrives
        if let Err(e) = self.wallet.debit(invest) {
            tracing::warn!(error = %e, "Local wallet out of sync with venue");
        }
        self.state.set_balance(self.wallet.balance());
        self.state.on_position_changed(position.clone());
        emit_trade_placed(&self.bus, &position);
        emit_wallet_changed(&self.bus, self.wallet.balance(), "trade placed");
        Ok(json!({ "position": position }))
    }

    /// Venue push channel and params for a sensor. Position and balance
    /// sensors ride on the environment's own account subscriptions.
    fn push_route(&self, sensor: &Sensor) -> Result<Option<(PushChannel, Value)>, ActionError> {
        let params = sensor.params;
        let missing = || ActionError::InvalidParams(format!("sensor {} lacks parameters", sensor.id));
        match sensor.kind {
            SensorKind::Candle => {
                let inst = params.instrument_id.ok_or_else(missing)?;
                let size = params.period_seconds.ok_or_else(missing)?;
                Ok(Some((
                    PushChannel::Candles,
                    json!({ "active_id": inst, "size": size }),
                )))
            }
            SensorKind::Mood => {
                let inst = params.instrument_id.ok_or_else(missing)?;
                Ok(Some((PushChannel::Mood, json!({ "asset_id": inst }))))
            }
            SensorKind::Order => Ok(Some((
                PushChannel::Orders,
                json!({ "user_id": self.user_id }),
            ))),
            SensorKind::Position | SensorKind::Balance => Ok(None),
        }
    }

    async fn subscribe_sensor(&mut self, sensor: Sensor) -> Result<Value, ActionError> {
        let sensor = sensor.normalized();
        let route = self.push_route(&sensor)?;
        let id = sensor.id.clone();
        if !self.sensors.subscribe(sensor.clone()) {
            return Ok(json!({ "sensor_id": id, "subscribed": false }));
        }

        if let Some((channel, params)) = route {
            match self.venue.subscribe(channel, params).await {
                Ok(key) => {
                    self.sensor_keys.insert(id.clone(), key);
                }
                Err(e) => {
                    self.sensors.unsubscribe(&id);
                    return Err(ActionError::Venue(e.to_string()));
                }
            }
        }

        let mut prefilled = 0;
        if let (SensorKind::Candle, Some(inst), Some(period)) = (
            sensor.kind,
            sensor.params.instrument_id,
            sensor.params.period_seconds,
        ) {
            let now = self.bus.clock().now();
            match self
                .venue
                .candles(inst, period, self.sensors.capacity(), now)
                .await
            {
                Ok(history) => {
                    prefilled = self
                        .sensors
                        .prefill(&id, history.into_iter().map(SensorItem::Candle));
                }
                Err(e) => {
                    tracing::warn!(sensor_id = %id, error = %e, "Candle history unavailable, starting empty");
                }
            }
        }

        Ok(json!({ "sensor_id": id, "subscribed": true, "prefilled": prefilled }))
    }

    async fn unsubscribe_sensor(&mut self, id: &SensorId) -> Result<Value, ActionError> {
        if !self.sensors.unsubscribe(id) {
            return Err(ActionError::UnknownSensor(id.clone()));
        }
        if let Some(key) = self.sensor_keys.remove(id) {
            self.venue.unsubscribe(&key).await;
        }
        Ok(json!({ "sensor_id": id }))
    }

    fn on_candle(&mut self, msg: Value) {
        match lenient_candle(&msg) {
            Some(candle) => {
                self.sensors.push(SensorItem::Candle(candle));
            }
            None => tracing::warn!("Unusable candle push dropped"),
        }
    }

    fn on_mood(&mut self, msg: Value) {
        match lenient_mood(&msg, self.bus.clock().now()) {
            Some(mood) => {
                self.sensors.push(SensorItem::Mood(mood));
            }
            None => tracing::warn!("Unusable mood push dropped"),
        }
    }

    fn on_order(&mut self, msg: Value) {
        self.sensors.push(SensorItem::Order(msg));
    }

    fn on_balance(&mut self, msg: Value) {
        let Some(update) = lenient_balance_update(&msg) else {
            tracing::warn!("Unusable balance push dropped");
            return;
        };
        if Some(update.id) != self.balance_id {
            return;
        }
        self.wallet.sync(update.amount);
        self.state.set_balance(update.amount);
        emit_wallet_changed(&self.bus, update.amount, "venue update");
        self.sensors.push(SensorItem::Balance(BalanceUpdate {
            balance: update.amount,
            currency: update.currency,
        }));
    }

    /// Apply a position push. Returns the position when it closed and has
    /// not been reported to the agent yet.
    fn on_position(&mut self, msg: Value) -> Option<Position> {
        let Some(position) = lenient_position(&msg) else {
            tracing::warn!("Unusable position push dropped");
            return None;
        };

        let change = self.state.on_position_changed(position.clone());
        match change {
            PositionChange::Opened | PositionChange::Updated => {
                self.bus
                    .emit(EventType::PositionChanged, json!({ "position": position }));
            }
            PositionChange::Closed => emit_trade_closed(&self.bus, &position),
            PositionChange::Ignored => return None,
        }
        self.sensors.push(SensorItem::Position(position.clone()));

        (change == PositionChange::Closed && self.reported.insert(position.id.clone()))
            .then_some(position)
    }

    async fn run_cycle(&mut self, agent: &mut dyn Agent) {
        let observation = self.observe();
        let ctx = self.context(agent.name());
        let actions = agent.on_observation(&observation, &ctx);
        if !actions.is_empty() {
            self.execute_actions(actions).await;
        }
    }
}

#[async_trait]
impl<V: VenueApi> TradingEnvironment for LiveEnvironment<V> {
    type Report = EnvironmentSnapshot;

    async fn initialize(&mut self) -> anyhow::Result<EnvironmentInfo> {
        let profile = self.venue.profile().await.context("Failed to fetch profile")?;
        let balances = self
            .venue
            .balances()
            .await
            .context("Failed to fetch balances")?;
        let mode = self.config.account_mode;
        let balance = balances
            .iter()
            .find(|b| b.mode == mode)
            .with_context(|| format!("No {mode:?} balance on account"))?;
        self.balance_id = Some(balance.id);
        self.user_id = Some(profile.user_id);
        self.arm_wallet(balance.amount);
        self.state.set_balance(balance.amount);

        // receivers first so no push is missed
        self.streams = Some(PushStreams {
            candles: self.venue.pushes(PushChannel::Candles).await,
            moods: self.venue.pushes(PushChannel::Mood).await,
            positions: self.venue.pushes(PushChannel::Positions).await,
            orders: self.venue.pushes(PushChannel::Orders).await,
            balances: self.venue.pushes(PushChannel::Balances).await,
        });
        let account = json!({ "user_id": profile.user_id });
        for channel in [PushChannel::Balances, PushChannel::Positions] {
            self.venue
                .subscribe(channel, account.clone())
                .await
                .with_context(|| format!("Failed to subscribe {}", channel.name()))?;
        }

        let instruments: Vec<Instrument> = self
            .venue
            .instruments()
            .await
            .context("Failed to fetch instruments")?
            .into_iter()
            .filter(Instrument::is_tradable)
            .collect();
        self.min_stake = min_stake(&instruments, self.config.min_stake_floor);
        self.state.set_instruments(instruments.clone());
        let now = self.bus.clock().now();
        self.state.set_server_time(now);

        tracing::info!(
            user_id = profile.user_id,
            mode = ?mode,
            balance = %balance.amount,
            instruments = instruments.len(),
            min_stake = %self.min_stake,
            "Live environment initialized"
        );

        let info = EnvironmentInfo {
            mode: RunMode::Live,
            balance: balance.amount,
            min_stake: self.min_stake,
            instruments,
            start_time: now,
        };
        self.info = Some(info.clone());
        Ok(info)
    }

    fn observe(&self) -> Observation {
        Observation {
            sensors: self.sensors.snapshot(),
            state: self.state.snapshot(),
            timestamp: self.bus.clock().now(),
        }
    }

    async fn execute_actions(&mut self, actions: Vec<Action>) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(actions.len());
        for (index, action) in actions.into_iter().enumerate() {
            let outcome = if self.halted.load(Ordering::SeqCst) {
                Err(ActionError::Halted)
            } else {
                self.execute_one(&action).await
            };
            results.push(record_result(&self.bus, index, &action, outcome));
        }
        results
    }

    fn snapshot(&self) -> EnvironmentSnapshot {
        self.state.snapshot()
    }

    async fn run_agent(&mut self, agent: &mut dyn Agent) -> anyhow::Result<EnvironmentSnapshot> {
        let info = match self.info.clone() {
            Some(info) => info,
            None => self.initialize().await?,
        };
        let mut streams = self
            .streams
            .take()
            .context("Push streams already consumed by an earlier run")?;
        let mut reconnects = self.venue.reconnects();
        let mut session = self.venue.session();
        let mut stop = self.stop.subscribe();

        self.bus.emit(
            EventType::RunStarted,
            json!({ "mode": RunMode::Live, "agent": agent.name(), "balance": info.balance }),
        );
        let ctx = self.context(agent.name());
        let actions = agent.initialize(&info, &ctx);
        self.execute_actions(actions).await;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let reason = loop {
            if self.halted.load(Ordering::SeqCst) {
                break "bust";
            }
            if *stop.borrow() {
                break "stopped";
            }

            tokio::select! {
                biased;

                _ = stop.changed() => break "stopped",
                _ = &mut ctrl_c => break "interrupted",
                Some(_) = self.updates.recv() => self.run_cycle(agent).await,
                Some(msg) = streams.positions.recv() => {
                    if let Some(closed) = self.on_position(msg) {
                        let ctx = self.context(agent.name());
                        agent.on_trade_result(&closed, &ctx);
                    }
                }
                Some(msg) = streams.balances.recv() => self.on_balance(msg),
                Some(msg) = streams.candles.recv() => self.on_candle(msg),
                Some(msg) = streams.moods.recv() => self.on_mood(msg),
                Some(msg) = streams.orders.recv() => self.on_order(msg),
                notice = reconnects.recv() => match notice {
                    Ok(notice) => {
                        self.bus.emit(
                            EventType::Reconnect,
                            json!({ "generation": notice.generation, "resubscribed": notice.resubscribed }),
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Missed reconnect notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break "session ended",
                },
                changed = session.changed() => {
                    let ended = changed.is_err()
                        || matches!(*session.borrow(), SessionState::Closed | SessionState::Failed(_));
                    if ended {
                        break "session ended";
                    }
                }
            }
        };

        let snapshot = self.state.snapshot();
        tracing::info!(
            reason,
            balance = %snapshot.balance,
            closed = snapshot.closed_count,
            total_pnl = %snapshot.total_pnl,
            "Live run stopped"
        );
        self.bus.emit(
            EventType::RunStopped,
            json!({ "reason": reason, "balance": snapshot.balance, "total_pnl": snapshot.total_pnl }),
        );
        Ok(snapshot)
    }
}
