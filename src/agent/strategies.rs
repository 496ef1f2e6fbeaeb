//! Reference strategies

use super::{Action, Agent, AgentContext, EnvironmentInfo, Observation};
use crate::market::{Candle, Direction, InstrumentId};
use crate::sensor::{Sensor, SensorId};
use crate::state::{Outcome, Position};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;

/// Parameters shared by the candle-run strategies
#[derive(Debug, Clone, PartialEq)]
pub struct CandleRunParams {
    pub instrument_id: InstrumentId,
    pub period_seconds: u32,
    /// Consecutive same-direction candles needed for a signal
    pub run_length: usize,
    pub invest: Decimal,
    pub expiration_seconds: u32,
}

impl CandleRunParams {
    pub fn new(instrument_id: InstrumentId, period_seconds: u32) -> Self {
        Self {
            instrument_id,
            period_seconds,
            run_length: 3,
            invest: Decimal::ONE,
            expiration_seconds: period_seconds,
        }
    }
}

/// Direction and length of the run of same-direction candles ending at
/// the newest candle. Flat candles end a run.
pub fn trailing_run(candles: &[&Candle]) -> Option<(Direction, usize)> {
    let direction = |c: &Candle| {
        if c.is_bullish() {
            Some(Direction::Call)
        } else if c.is_bearish() {
            Some(Direction::Put)
        } else {
            None
        }
    };

    let last = direction(candles.last()?)?;
    let len = candles
        .iter()
        .rev()
        .take_while(|c| direction(c) == Some(last))
        .count();
    Some((last, len))
}

/// Shared candle-run bookkeeping: at most one open trade, one entry per
/// candle period
#[derive(Debug)]
struct CandleRun {
    params: CandleRunParams,
    sensor: SensorId,
    min_stake: Decimal,
    last_entry: Option<DateTime<Utc>>,
}

impl CandleRun {
    fn new(params: CandleRunParams) -> Self {
        let sensor = SensorId::candle(params.instrument_id, params.period_seconds);
        Self {
            params,
            sensor,
            min_stake: Decimal::ZERO,
            last_entry: None,
        }
    }

    fn initialize(&mut self, env: &EnvironmentInfo) -> Vec<Action> {
        self.min_stake = env
            .instruments
            .iter()
            .find(|i| i.id == self.params.instrument_id)
            .map_or(env.min_stake, |i| i.min_stake);
        vec![Action::subscribe(Sensor::candle(
            self.params.instrument_id,
            self.params.period_seconds,
        ))]
    }

    /// The current run when it qualifies for an entry
    fn signal(&mut self, observation: &Observation) -> Option<(Direction, usize, DateTime<Utc>)> {
        if observation.has_open_position(self.params.instrument_id) {
            return None;
        }
        let candles = observation.candles(&self.sensor);
        let newest = candles.last()?.period_start;
        if self.last_entry == Some(newest) {
            return None;
        }
        let (direction, len) = trailing_run(&candles)?;
        (len >= self.params.run_length).then_some((direction, len, newest))
    }

    fn enter(&mut self, direction: Direction, at: DateTime<Utc>) -> Action {
        self.last_entry = Some(at);
        Action::trade(
            self.params.instrument_id,
            direction,
            self.params.invest.max(self.min_stake),
            self.params.expiration_seconds,
        )
    }
}

/// Follows a run of same-direction candles
#[derive(Debug)]
pub struct CandleMomentum {
    run: CandleRun,
}

impl CandleMomentum {
    pub fn new(params: CandleRunParams) -> Self {
        Self {
            run: CandleRun::new(params),
        }
    }
}

impl Agent for CandleMomentum {
    fn name(&self) -> &str {
        "candle-momentum"
    }

    fn initialize(&mut self, env: &EnvironmentInfo, _ctx: &AgentContext) -> Vec<Action> {
        self.run.initialize(env)
    }

    fn on_observation(&mut self, observation: &Observation, ctx: &AgentContext) -> Vec<Action> {
        let Some((direction, len, at)) = self.run.signal(observation) else {
            return Vec::new();
        };
        ctx.emit_signal(direction.to_string(), json!({ "run_length": len }));
        vec![self.run.enter(direction, at)]
    }
}

/// Bets against a run of same-direction candles. After a loss it waits
/// for a run one candle longer before entering again.
#[derive(Debug)]
pub struct StreakReversal {
    run: CandleRun,
    base_run_length: usize,
}

impl StreakReversal {
    pub fn new(params: CandleRunParams) -> Self {
        let base_run_length = params.run_length;
        Self {
            run: CandleRun::new(params),
            base_run_length,
        }
    }

    /// Run length currently required for an entry
    pub fn required_run(&self) -> usize {
        self.run.params.run_length
    }
}

impl Agent for StreakReversal {
    fn name(&self) -> &str {
        "streak-reversal"
    }

    fn initialize(&mut self, env: &EnvironmentInfo, _ctx: &AgentContext) -> Vec<Action> {
        self.run.initialize(env)
    }

    fn on_observation(&mut self, observation: &Observation, ctx: &AgentContext) -> Vec<Action> {
        let Some((direction, len, at)) = self.run.signal(observation) else {
            return Vec::new();
        };
        let reversed = match direction {
            Direction::Call => Direction::Put,
            Direction::Put => Direction::Call,
        };
        ctx.emit_signal(reversed.to_string(), json!({ "run_length": len }));
        vec![self.run.enter(reversed, at)]
    }

    fn on_trade_result(&mut self, position: &Position, ctx: &AgentContext) {
        match position.outcome() {
            Some(Outcome::Loss) => self.run.params.run_length += 1,
            Some(Outcome::Win) => self.run.params.run_length = self.base_run_length,
            _ => {}
        }
        ctx.emit_debug(
            "trade result",
            json!({
                "position_id": position.id,
                "pnl": position.pnl,
                "required_run": self.run.params.run_length,
            }),
        );
    }
}
