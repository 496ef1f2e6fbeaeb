//! Trading environments
//!
//! One interface with two implementations: [`LiveEnvironment`] does real
//! venue I/O, `BacktestEnvironment` replays datasets deterministically.

mod live;

pub use live::{LiveConfig, LiveEnvironment, StopHandle};

use crate::agent::{Action, ActionKind, Agent, EnvironmentInfo, Observation};
use crate::events::{EventBus, EventType};
use crate::market::{Instrument, InstrumentId};
use crate::sensor::SensorId;
use crate::state::{EnvironmentSnapshot, Position};
use crate::telemetry::{increment, CounterMetric};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;

/// Per-action failure, reported in that action's result slot
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Decimal, required: Decimal },
    #[error("Stake {invest} below minimum {min}")]
    BelowMinimumStake { invest: Decimal, min: Decimal },
    #[error("Unknown sensor: {0}")]
    UnknownSensor(SensorId),
    #[error("Unknown query method: {0}")]
    UnknownQueryMethod(String),
    #[error("No known price for instrument {0}")]
    NoPrice(InstrumentId),
    #[error("Unknown or untradable instrument {0}")]
    UnknownInstrument(InstrumentId),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Run halted")]
    Halted,
    #[error("Venue error: {0}")]
    Venue(String),
}

/// Outcome of one action in a batch
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub index: usize,
    pub kind: ActionKind,
    pub outcome: Result<Value, ActionError>,
}

impl ActionResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Environment interface shared by live trading and backtests
#[async_trait]
pub trait TradingEnvironment: Send {
    /// What a finished run yields
    type Report: Send;

    /// Prepare the environment and describe it to the agent
    async fn initialize(&mut self) -> anyhow::Result<EnvironmentInfo>;

    /// Current observation
    fn observe(&self) -> Observation;

    /// Execute a batch in order. A failed action never aborts the rest.
    async fn execute_actions(&mut self, actions: Vec<Action>) -> Vec<ActionResult>;

    fn snapshot(&self) -> EnvironmentSnapshot;

    /// Drive the agent until the data, the session or the wallet runs out
    async fn run_agent(&mut self, agent: &mut dyn Agent) -> anyhow::Result<Self::Report>;
}

/// Emit the executed/failed event for one action and wrap its result
pub(crate) fn record_result(
    bus: &EventBus,
    index: usize,
    action: &Action,
    outcome: Result<Value, ActionError>,
) -> ActionResult {
    let kind = action.kind();
    match &outcome {
        Ok(result) => {
            bus.emit(
                EventType::ActionExecuted,
                json!({ "index": index, "action": action, "result": result }),
            );
        }
        Err(e) => {
            increment(CounterMetric::ActionsFailed);
            tracing::warn!(index, kind = %kind, error = %e, "Action failed");
            bus.emit(
                EventType::ActionFailed,
                json!({ "index": index, "action": action, "error": e.to_string() }),
            );
        }
    }
    ActionResult { index, kind, outcome }
}

/// Smallest stake across tradable instruments, never below `floor`
pub(crate) fn min_stake(instruments: &[Instrument], floor: Decimal) -> Decimal {
    instruments
        .iter()
        .filter(|i| i.is_tradable())
        .map(|i| i.min_stake)
        .min()
        .map_or(floor, |m| m.max(floor))
}

/// Reject stakes below the instrument's minimum
pub(crate) fn check_stake(
    instrument: &Instrument,
    invest: Decimal,
    floor: Decimal,
) -> Result<(), ActionError> {
    let min = instrument.min_stake.max(floor);
    if invest < min {
        return Err(ActionError::BelowMinimumStake { invest, min });
    }
    Ok(())
}

pub(crate) fn emit_trade_placed(bus: &EventBus, position: &Position) {
    increment(CounterMetric::TradesPlaced);
    tracing::info!(
        position_id = %position.id,
        instrument_id = position.instrument_id,
        direction = %position.direction,
        invest = %position.invest,
        open_quote = %position.open_quote,
        "Trade placed"
    );
    bus.emit(EventType::TradePlaced, json!({ "position": position }));
    bus.emit(EventType::PositionChanged, json!({ "position": position }));
}

pub(crate) fn emit_trade_closed(bus: &EventBus, position: &Position) {
    increment(CounterMetric::TradesSettled);
    tracing::info!(
        position_id = %position.id,
        reason = ?position.close_reason,
        pnl = ?position.pnl,
        "Trade closed"
    );
    bus.emit(EventType::PositionChanged, json!({ "position": position }));
    bus.emit(EventType::TradeClosed, json!({ "position": position }));
}

pub(crate) fn emit_wallet_changed(bus: &EventBus, balance: Decimal, reason: &str) {
    bus.emit(
        EventType::WalletChanged,
        json!({ "balance": balance, "reason": reason }),
    );
}
