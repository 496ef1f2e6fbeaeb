//! Backtest simulator engine

use super::analytics::{BacktestReport, BacktestSummary};
use super::replay::Timeline;
use super::settlement::PendingTrade;
use super::BacktestConfig;
use crate::agent::{Action, Agent, AgentContext, EnvironmentInfo, Observation, RunMode};
use crate::clock::Clock;
use crate::config::AccountMode;
use crate::env::{
    check_stake, emit_trade_closed, emit_trade_placed, emit_wallet_changed, min_stake,
    record_result, ActionError, ActionResult, TradingEnvironment,
};
use crate::events::{EventBus, EventType};
use crate::market::{Candle, Dataset, Direction, Instrument, InstrumentId};
use crate::sensor::{Sensor, SensorId, SensorItem, SensorKind, SensorManager};
use crate::state::{CloseReason, EnvironmentSnapshot, EnvironmentState, Position, PositionId, Wallet};
use crate::venue::{Balance, QueryMethod};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type TradeResolved = Box<dyn FnMut(&Position) + Send>;

/// Deterministic replay environment.
///
/// Per candle: advance the clock, settle due trades, buffer the candle,
/// then run one observation cycle. An agent never sees a candle before
/// every expiration at or before it has settled.
pub struct BacktestEnvironment {
    config: BacktestConfig,
    datasets: Vec<Dataset>,
    timeline: Timeline,
    clock: Clock,
    bus: EventBus,
    state: EnvironmentState,
    wallet: Wallet,
    sensors: SensorManager,
    instruments: Vec<Instrument>,
    pending: Vec<PendingTrade>,
    last_close: HashMap<InstrumentId, Decimal>,
    next_trade: u64,
    reported: HashSet<PositionId>,
    trades: Vec<Position>,
    on_trade_resolved: Option<TradeResolved>,
    halted: Arc<AtomicBool>,
    info: Option<EnvironmentInfo>,
}

impl BacktestEnvironment {
    pub fn new(datasets: Vec<Dataset>, config: BacktestConfig) -> Self {
        let timeline = Timeline::new(&datasets);
        let clock = Clock::simulated(timeline.start().unwrap_or_default());
        let bus = match &config.run_id {
            Some(run_id) => EventBus::with_run_id(run_id.clone(), clock.clone()),
            None => EventBus::new(clock.clone()),
        };

        let halted = Arc::new(AtomicBool::new(false));
        let mut wallet = Wallet::new(config.initial_balance);
        let flag = halted.clone();
        wallet.on_bust(move |balance| {
            tracing::error!(%balance, "Wallet bust, halting backtest");
            flag.store(true, Ordering::SeqCst);
        });

        let instruments = synthesize_instruments(&datasets, &config);

        Self {
            sensors: SensorManager::new(config.buffer_capacity),
            state: EnvironmentState::new(config.initial_balance),
            config,
            datasets,
            timeline,
            clock,
            bus,
            wallet,
            instruments,
            pending: Vec::new(),
            last_close: HashMap::new(),
            next_trade: 0,
            reported: HashSet::new(),
            trades: Vec::new(),
            on_trade_resolved: None,
            halted,
            info: None,
        }
    }

    /// Load dataset files and build the environment
    pub fn from_files(
        paths: &[impl AsRef<std::path::Path>],
        config: BacktestConfig,
    ) -> anyhow::Result<Self> {
        let datasets = paths
            .iter()
            .map(Dataset::load)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(datasets, config))
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn sensors(&self) -> &SensorManager {
        &self.sensors
    }

    pub fn pending(&self) -> &[PendingTrade] {
        &self.pending
    }

    /// Called once per resolved trade, after the ledger is updated
    pub fn on_trade_resolved(&mut self, callback: impl FnMut(&Position) + Send + 'static) {
        self.on_trade_resolved = Some(Box::new(callback));
    }

    fn context(&self, agent: &str) -> AgentContext {
        let view = self.wallet.view(
            self.state.total_pnl(),
            self.state.drawdown(),
            self.state.max_drawdown(),
        );
        AgentContext::new(self.bus.clone(), view, agent)
    }

    /// Synchronous form of [`TradingEnvironment::execute_actions`]
    pub fn execute_actions_sync(&mut self, actions: Vec<Action>) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(actions.len());
        for (index, action) in actions.into_iter().enumerate() {
            let outcome = if self.halted.load(Ordering::SeqCst) {
                Err(ActionError::Halted)
            } else {
                self.execute_one(&action)
            };
            results.push(record_result(&self.bus, index, &action, outcome));
        }
        results
    }

    fn execute_one(&mut self, action: &Action) -> Result<Value, ActionError> {
        match action {
            Action::Trade {
                instrument_id,
                direction,
                invest,
                expiration_seconds,
                price,
            } => self.place_trade(*instrument_id, *direction, *invest, *expiration_seconds, *price),
            Action::Subscribe { sensor } => self.subscribe_sensor(sensor.clone()),
            Action::Unsubscribe { sensor_id } => {
                if !self.sensors.unsubscribe(sensor_id) {
                    return Err(ActionError::UnknownSensor(sensor_id.clone()));
                }
                Ok(json!({ "sensor_id": sensor_id }))
            }
            Action::Query { method, params } => {
                let method: QueryMethod = method.parse().map_err(ActionError::UnknownQueryMethod)?;
                self.query(method, params)
            }
        }
    }

    fn place_trade(
        &mut self,
        instrument_id: InstrumentId,
        direction: Direction,
        invest: Decimal,
        expiration_seconds: u32,
        price: Option<Decimal>,
    ) -> Result<Value, ActionError> {
        let instrument = self
            .instruments
            .iter()
            .find(|i| i.id == instrument_id)
            .ok_or(ActionError::UnknownInstrument(instrument_id))?;
        check_stake(instrument, invest, self.config.min_stake)?;
        if expiration_seconds == 0 {
            return Err(ActionError::InvalidParams(
                "expiration must be positive".to_string(),
            ));
        }
        if !self.wallet.can_afford(invest) {
            return Err(ActionError::InsufficientFunds {
                balance: self.wallet.balance(),
                required: invest,
            });
        }
        let open_quote = price
            .or_else(|| self.last_close.get(&instrument_id).copied())
            .ok_or(ActionError::NoPrice(instrument_id))?;

        self.next_trade += 1;
        let now = self.clock.now();
        let trade = PendingTrade {
            id: format!("bt-{}", self.next_trade),
            instrument_id,
            direction,
            invest,
            open_quote,
            open_time: now,
            expiration_time: now + chrono::Duration::seconds(i64::from(expiration_seconds)),
            expiration_seconds,
            profit_percent: instrument.profit_percent,
        };
        let position = trade.position();

        // the stake is held until settlement; a bust only halts later actions
        if let Err(e) = self.wallet.debit(invest) {
            return Err(ActionError::Venue(e.to_string()));
        }
        self.state.set_balance(self.wallet.balance());
        self.state.on_position_changed(position.clone());
        emit_trade_placed(&self.bus, &position);
        emit_wallet_changed(&self.bus, self.wallet.balance(), "trade placed");
        self.pending.push(trade);

        Ok(json!({ "position": position }))
    }

    fn subscribe_sensor(&mut self, sensor: Sensor) -> Result<Value, ActionError> {
        let sensor = sensor.normalized();
        let candle_params = match sensor.kind {
            SensorKind::Candle => Some(
                sensor
                    .params
                    .instrument_id
                    .zip(sensor.params.period_seconds)
                    .ok_or_else(|| {
                        ActionError::InvalidParams(format!("sensor {} lacks parameters", sensor.id))
                    })?,
            ),
            _ => None,
        };

        let id = sensor.id.clone();
        if !self.sensors.subscribe(sensor) {
            return Ok(json!({ "sensor_id": id, "subscribed": false }));
        }

        let prefilled = match candle_params {
            Some((instrument_id, period_seconds)) => {
                let history = self.history(instrument_id, period_seconds, self.sensors.capacity());
                let items: Vec<SensorItem> = history.into_iter().map(SensorItem::Candle).collect();
                self.sensors.prefill(&id, items)
            }
            None => {
                tracing::warn!(sensor_id = %id, "Sensor kind not simulated in backtest, buffer stays empty");
                0
            }
        };

        Ok(json!({ "sensor_id": id, "subscribed": true, "prefilled": prefilled }))
    }

    /// The last `count` dataset candles strictly before simulated time
    fn history(&self, instrument_id: InstrumentId, period_seconds: u32, count: usize) -> Vec<Candle> {
        let now = self.clock.now();
        self.datasets
            .iter()
            .find(|d| d.instrument_id == instrument_id && d.period_seconds == period_seconds)
            .map(|d| {
                let before = d.candles_before(now);
                before[before.len().saturating_sub(count)..].to_vec()
            })
            .unwrap_or_default()
    }

    fn query(&self, method: QueryMethod, params: &Value) -> Result<Value, ActionError> {
        let snapshot = self.state.snapshot();
        let value = match method {
            QueryMethod::Positions => json!(snapshot.open_positions),
            QueryMethod::History => json!(snapshot.recent_closed),
            QueryMethod::Balances => json!([Balance {
                id: 0,
                mode: AccountMode::Practice,
                amount: self.wallet.balance(),
                currency: "USD".to_string(),
            }]),
            QueryMethod::Instruments => json!(self.instruments),
            QueryMethod::Orders | QueryMethod::Mood => json!([]),
            QueryMethod::Candles => {
                let instrument_id = params
                    .get("instrument_id")
                    .and_then(Value::as_u64)
                    .and_then(|v| InstrumentId::try_from(v).ok())
                    .ok_or_else(|| ActionError::InvalidParams("instrument_id required".to_string()))?;
                let period_seconds = match params.get("period_seconds").and_then(Value::as_u64) {
                    Some(p) => u32::try_from(p)
                        .map_err(|_| ActionError::InvalidParams("period_seconds out of range".to_string()))?,
                    None => self
                        .datasets
                        .iter()
                        .find(|d| d.instrument_id == instrument_id)
                        .map(|d| d.period_seconds)
                        .ok_or(ActionError::UnknownInstrument(instrument_id))?,
                };
                let count = params
                    .get("count")
                    .and_then(Value::as_u64)
                    .map_or(self.sensors.capacity(), |c| c as usize);
                json!(self.history(instrument_id, period_seconds, count))
            }
        };
        Ok(value)
    }

    /// Close quote for a due trade: the close of the instrument's first
    /// candle at or after expiration that has already been replayed,
    /// falling back to the last known close. Open quotes are closes too,
    /// so gapless data still moves between the two.
    fn close_quote(&self, trade: &PendingTrade, now: DateTime<Utc>) -> Decimal {
        let at_expiry = self
            .datasets
            .iter()
            .filter(|d| d.instrument_id == trade.instrument_id)
            .filter_map(|d| d.first_at_or_after(trade.expiration_time))
            .filter(|c| c.period_start <= now)
            .min_by_key(|c| c.period_start)
            .map(|c| c.close);
        match at_expiry {
            Some(quote) => quote,
            None => {
                tracing::warn!(
                    position_id = %trade.id,
                    instrument_id = trade.instrument_id,
                    "No candle at expiration, settling at last known close"
                );
                self.last_known_close(trade)
            }
        }
    }

    fn last_known_close(&self, trade: &PendingTrade) -> Decimal {
        self.last_close
            .get(&trade.instrument_id)
            .copied()
            .unwrap_or(trade.open_quote)
    }

    fn settle_due(&mut self, now: DateTime<Utc>, agent: &mut dyn Agent) {
        let (due, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|t| t.is_due(now));
        self.pending = pending;
        for trade in due {
            let quote = self.close_quote(&trade, now);
            self.resolve(trade, quote, now, agent);
        }
    }

    /// Close every remaining trade at its instrument's last known close
    fn force_close_all(&mut self, agent: &mut dyn Agent) {
        let now = self.clock.now();
        let remaining = std::mem::take(&mut self.pending);
        if !remaining.is_empty() {
            tracing::info!(count = remaining.len(), "Force-closing open trades at end of replay");
        }
        for trade in remaining {
            let quote = self.last_known_close(&trade);
            self.resolve(trade, quote, now, agent);
        }
    }

    fn resolve(
        &mut self,
        trade: PendingTrade,
        close_quote: Decimal,
        close_time: DateTime<Utc>,
        agent: &mut dyn Agent,
    ) {
        if !self.reported.insert(trade.id.clone()) {
            tracing::warn!(position_id = %trade.id, "Trade already resolved");
            return;
        }

        let settlement = trade.settle(close_quote);
        let position = trade
            .position()
            .closed(close_quote, settlement.reason, close_time, settlement.pnl);

        if settlement.credit > Decimal::ZERO {
            self.wallet.credit(settlement.credit);
        }
        self.state.set_balance(self.wallet.balance());
        self.state.on_position_changed(position.clone());
        emit_trade_closed(&self.bus, &position);
        if settlement.reason != CloseReason::Tie {
            emit_wallet_changed(&self.bus, self.wallet.balance(), "trade settled");
        }

        if let Some(callback) = self.on_trade_resolved.as_mut() {
            callback(&position);
        }
        let ctx = self.context(agent.name());
        agent.on_trade_result(&position, &ctx);
        self.trades.push(position);
    }

    fn cycle(&mut self, agent: &mut dyn Agent) {
        let observation = self.observe();
        let ctx = self.context(agent.name());
        let actions = agent.on_observation(&observation, &ctx);
        if !actions.is_empty() {
            self.execute_actions_sync(actions);
        }
    }

    /// Replay every candle through `agent`
    pub fn replay(&mut self, agent: &mut dyn Agent) -> anyhow::Result<BacktestReport> {
        let info = match self.info.clone() {
            Some(info) => info,
            None => self.initialize_sync()?,
        };

        self.bus.emit(
            EventType::RunStarted,
            json!({
                "mode": RunMode::Backtest,
                "agent": agent.name(),
                "balance": info.balance,
                "datasets": self.datasets.len(),
                "candles": self.timeline.len(),
            }),
        );
        let ctx = self.context(agent.name());
        let actions = agent.initialize(&info, &ctx);
        self.execute_actions_sync(actions);

        while !self.halted.load(Ordering::SeqCst) {
            let Some(candle) = self.timeline.next() else {
                break;
            };
            self.clock.advance_to(candle.period_start);
            let now = self.clock.now();
            self.state.set_server_time(now);

            self.settle_due(now, agent);

            self.last_close.insert(candle.instrument_id, candle.close);
            if self.sensors.push(SensorItem::Candle(candle)) {
                self.cycle(agent);
            }
        }

        let halted = self.halted.load(Ordering::SeqCst);
        self.force_close_all(agent);

        let snapshot = self.state.snapshot();
        let summary = BacktestSummary::from_trades(
            &self.trades,
            self.config.initial_balance,
            self.wallet.balance(),
            snapshot.max_drawdown,
        );
        tracing::info!(
            agent = agent.name(),
            trades = summary.total_trades,
            net_pnl = %summary.net_pnl,
            final_balance = %summary.final_balance,
            halted,
            "Backtest finished"
        );
        self.bus.emit(
            EventType::RunStopped,
            json!({
                "reason": if halted { "bust" } else { "dataset exhausted" },
                "balance": self.wallet.balance(),
                "total_pnl": snapshot.total_pnl,
                "trades": self.trades.len(),
            }),
        );

        Ok(BacktestReport {
            run_id: self.bus.run_id().to_string(),
            agent: agent.name().to_string(),
            trades: self.trades.clone(),
            final_balance: self.wallet.balance(),
            snapshot,
            summary,
            candles_replayed: self.timeline.replayed(),
            halted,
        })
    }

    fn initialize_sync(&mut self) -> anyhow::Result<EnvironmentInfo> {
        if self.timeline.is_empty() {
            anyhow::bail!("No candles to replay");
        }
        let now = self.clock.now();
        self.state.set_balance(self.wallet.balance());
        self.state.set_instruments(self.instruments.clone());
        self.state.set_server_time(now);

        let info = EnvironmentInfo {
            mode: RunMode::Backtest,
            balance: self.wallet.balance(),
            min_stake: min_stake(&self.instruments, self.config.min_stake),
            instruments: self.instruments.clone(),
            start_time: now,
        };
        tracing::info!(
            datasets = self.datasets.len(),
            candles = self.timeline.len(),
            balance = %info.balance,
            start = %now,
            "Backtest environment initialized"
        );
        self.info = Some(info.clone());
        Ok(info)
    }
}

/// One tradable instrument per dataset instrument, with configured payout
fn synthesize_instruments(datasets: &[Dataset], config: &BacktestConfig) -> Vec<Instrument> {
    let mut instruments: Vec<Instrument> = Vec::new();
    for dataset in datasets {
        match instruments.iter_mut().find(|i| i.id == dataset.instrument_id) {
            Some(existing) => {
                if !existing.expiration_seconds.contains(&dataset.period_seconds) {
                    existing.expiration_seconds.push(dataset.period_seconds);
                }
            }
            None => instruments.push(Instrument {
                id: dataset.instrument_id,
                name: format!("instrument-{}", dataset.instrument_id),
                enabled: true,
                suspended: false,
                profit_percent: config.profit_percent,
                min_stake: config.min_stake,
                max_stake: Decimal::MAX,
                deadtime_seconds: 0,
                expiration_seconds: vec![dataset.period_seconds],
            }),
        }
    }
    instruments
}

#[async_trait]
impl TradingEnvironment for BacktestEnvironment {
    type Report = BacktestReport;

    async fn initialize(&mut self) -> anyhow::Result<EnvironmentInfo> {
        self.initialize_sync()
    }

    fn observe(&self) -> Observation {
        Observation {
            sensors: self.sensors.snapshot(),
            state: self.state.snapshot(),
            timestamp: self.clock.now(),
        }
    }

    async fn execute_actions(&mut self, actions: Vec<Action>) -> Vec<ActionResult> {
        self.execute_actions_sync(actions)
    }

    fn snapshot(&self) -> EnvironmentSnapshot {
        self.state.snapshot()
    }

    async fn run_agent(&mut self, agent: &mut dyn Agent) -> anyhow::Result<BacktestReport> {
        self.replay(agent)
    }
}
