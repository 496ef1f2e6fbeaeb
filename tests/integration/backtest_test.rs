//! Backtest replay and settlement end-to-end tests

use blitz_trader::agent::strategies::{CandleMomentum, CandleRunParams, StreakReversal};
use blitz_trader::agent::{Action, Agent, AgentContext, EnvironmentInfo, Observation};
use blitz_trader::backtest::{BacktestConfig, BacktestEnvironment, BacktestReport};
use blitz_trader::events::{BufferedSink, EventType, MemorySink};
use blitz_trader::market::{Candle, Dataset, Direction};
use blitz_trader::sensor::Sensor;
use blitz_trader::state::{CloseReason, Position};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

const T0: i64 = 1_700_000_000;

fn candle(instrument_id: u32, start: i64, open: Decimal, close: Decimal) -> Candle {
    let period_start = Utc.timestamp_opt(start, 0).unwrap();
    Candle {
        instrument_id,
        period_seconds: 60,
        period_start,
        period_end: period_start + chrono::Duration::seconds(60),
        open,
        close,
        low: open.min(close),
        high: open.max(close),
        volume: dec!(1),
    }
}

/// Deterministic zig-zag with runs of varying length
fn wavy_dataset(instrument_id: u32, len: i64) -> Dataset {
    let mut price = dec!(1.1000);
    let candles = (0..len)
        .map(|i| {
            let up = (i / 3 + i / 7) % 2 == 0;
            let step = dec!(0.0001) * Decimal::from(1 + i % 3);
            let open = price;
            price = if up { price + step } else { price - step };
            candle(instrument_id, T0 + i * 60, open, price)
        })
        .collect();
    Dataset::new(instrument_id, 60, candles)
}

fn config(balance: Decimal) -> BacktestConfig {
    BacktestConfig {
        initial_balance: balance,
        run_id: Some("replay".to_string()),
        ..Default::default()
    }
}

/// Plays a fixed list of action batches, one per observation
struct Script {
    sensors: Vec<Sensor>,
    plan: VecDeque<Vec<Action>>,
    results: Vec<Position>,
    /// (observation time, closed trades at that time)
    seen: Vec<(i64, u64)>,
}

impl Script {
    fn new(sensors: Vec<Sensor>, plan: Vec<Vec<Action>>) -> Self {
        Self {
            sensors,
            plan: plan.into(),
            results: Vec::new(),
            seen: Vec::new(),
        }
    }
}

impl Agent for Script {
    fn name(&self) -> &str {
        "script"
    }

    fn initialize(&mut self, _env: &EnvironmentInfo, _ctx: &AgentContext) -> Vec<Action> {
        self.sensors.iter().cloned().map(Action::subscribe).collect()
    }

    fn on_observation(&mut self, observation: &Observation, _ctx: &AgentContext) -> Vec<Action> {
        self.seen
            .push((observation.timestamp.timestamp(), observation.state.closed_count));
        self.plan.pop_front().unwrap_or_default()
    }

    fn on_trade_result(&mut self, position: &Position, _ctx: &AgentContext) {
        self.results.push(position.clone());
    }
}

fn run_momentum(dataset: Dataset) -> (BacktestReport, Vec<(String, serde_json::Value)>) {
    let mut env = BacktestEnvironment::new(vec![dataset], config(dec!(1000)));
    let sink = MemorySink::new();
    let handle = env.bus().attach_sink(BufferedSink::new(sink.clone(), 1));
    let mut params = CandleRunParams::new(1, 60);
    params.invest = dec!(10);
    let mut agent = CandleMomentum::new(params);

    let report = env.replay(&mut agent).unwrap();
    handle.flush().unwrap();
    let events = sink
        .events()
        .into_iter()
        .map(|e| (e.event_type.to_string(), e.payload))
        .collect();
    (report, events)
}

#[test]
fn test_replay_is_deterministic() {
    let (first, first_events) = run_momentum(wavy_dataset(1, 300));
    let (second, second_events) = run_momentum(wavy_dataset(1, 300));

    assert!(first.summary.wins > 0);
    assert!(first.summary.losses > 0);
    assert_eq!(first.trades, second.trades);
    assert_eq!(first.final_balance, second.final_balance);
    assert_eq!(first.summary, second.summary);
    assert_eq!(first_events, second_events);
    assert_eq!(first.candles_replayed, 300);
}

#[test]
fn test_winning_call_pays_stake_plus_profit() {
    let dataset = Dataset::new(
        1,
        60,
        vec![
            candle(1, T0, dec!(1.1000), dec!(1.1000)),
            candle(1, T0 + 60, dec!(1.1000), dec!(1.1010)),
            candle(1, T0 + 120, dec!(1.1010), dec!(1.1015)),
        ],
    );
    let mut env = BacktestEnvironment::new(vec![dataset], config(dec!(1000)));
    let resolved = Arc::new(Mutex::new(Vec::new()));
    let sink = resolved.clone();
    env.on_trade_resolved(move |p| sink.lock().unwrap().push(p.clone()));
    let balances = Arc::new(Mutex::new(Vec::new()));
    let seen = balances.clone();
    env.bus().subscribe(EventType::WalletChanged, move |e| {
        seen.lock().unwrap().push(e.payload["balance"].clone());
    });

    let mut agent = Script::new(
        vec![Sensor::candle(1, 60)],
        vec![vec![Action::trade(1, Direction::Call, dec!(20), 60)]],
    );
    let report = env.replay(&mut agent).unwrap();

    let trade = &report.trades[0];
    assert_eq!(trade.open_quote, dec!(1.1000));
    assert_eq!(trade.close_quote, Some(dec!(1.1010)));
    assert_eq!(trade.close_reason, Some(CloseReason::Win));
    assert_eq!(trade.pnl, Some(dec!(17)));
    assert_eq!(report.final_balance, dec!(1017));

    let balances = balances.lock().unwrap();
    assert_eq!(*balances, vec![serde_json::json!("980"), serde_json::json!("1017")]);
    assert_eq!(resolved.lock().unwrap().len(), 1);
    assert_eq!(agent.results.len(), 1);
}

#[test]
fn test_gapless_uptrend_pays_every_expired_call() {
    // each candle opens at the previous close
    let mut price = dec!(1.1000);
    let candles = (0..50)
        .map(|i| {
            let open = price;
            price += dec!(0.0010);
            candle(1, T0 + i * 60, open, price)
        })
        .collect();
    let dataset = Dataset::new(1, 60, candles);
    let mut env = BacktestEnvironment::new(vec![dataset], config(dec!(1000)));
    let mut agent = CandleMomentum::new(CandleRunParams::new(1, 60));
    let report = env.replay(&mut agent).unwrap();

    // one entry per candle from the third on; the last one is force-closed flat
    assert_eq!(report.summary.total_trades, 48);
    assert_eq!(report.summary.wins, 47);
    assert_eq!(report.summary.losses, 0);
    assert_eq!(report.summary.ties, 1);
    let first = &report.trades[0];
    assert_eq!(first.open_quote, dec!(1.1030));
    assert_eq!(first.close_quote, Some(dec!(1.1040)));
    assert_eq!(report.final_balance, dec!(1039.95));
}

#[test]
fn test_settlement_precedes_observation_of_the_expiry_candle() {
    let dataset = wavy_dataset(1, 5);
    let mut env = BacktestEnvironment::new(vec![dataset], config(dec!(100)));
    let mut agent = Script::new(
        vec![Sensor::candle(1, 60)],
        vec![vec![Action::trade(1, Direction::Put, dec!(5), 60)]],
    );
    env.replay(&mut agent).unwrap();

    assert_eq!(agent.seen[0], (T0, 0));
    assert_eq!(agent.seen[1], (T0 + 60, 1));
}

#[test]
fn test_forced_close_resolves_each_trade_once_at_last_close() {
    let eurusd = Dataset::new(
        1,
        60,
        vec![
            candle(1, T0, dec!(1.10), dec!(1.10)),
            candle(1, T0 + 60, dec!(1.10), dec!(1.15)),
            candle(1, T0 + 120, dec!(1.15), dec!(1.20)),
        ],
    );
    let gbpusd = Dataset::new(
        2,
        60,
        vec![
            candle(2, T0, dec!(1.30), dec!(1.30)),
            candle(2, T0 + 60, dec!(1.30), dec!(1.25)),
        ],
    );
    let mut env = BacktestEnvironment::new(vec![eurusd, gbpusd], config(dec!(100)));
    let resolved = Arc::new(Mutex::new(0usize));
    let counter = resolved.clone();
    env.on_trade_resolved(move |_| *counter.lock().unwrap() += 1);

    // candle 1 of instrument 1, then candle 1 of instrument 2
    let mut agent = Script::new(
        vec![Sensor::candle(1, 60), Sensor::candle(2, 60)],
        vec![
            vec![Action::trade(1, Direction::Call, dec!(10), 3600)],
            vec![Action::trade(2, Direction::Call, dec!(10), 3600)],
        ],
    );
    let report = env.replay(&mut agent).unwrap();

    assert_eq!(report.trades.len(), 2);
    assert_eq!(*resolved.lock().unwrap(), 2);
    assert_eq!(agent.results.len(), 2);
    assert!(env.pending().is_empty());

    let by_instrument = |id: u32| report.trades.iter().find(|p| p.instrument_id == id).unwrap();
    assert_eq!(by_instrument(1).close_quote, Some(dec!(1.20)));
    assert_eq!(by_instrument(1).close_reason, Some(CloseReason::Win));
    assert_eq!(by_instrument(2).close_quote, Some(dec!(1.25)));
    assert_eq!(by_instrument(2).close_reason, Some(CloseReason::Loss));
    assert_eq!(report.final_balance, dec!(98.5));
    assert_eq!(report.snapshot.closed_count, 2);
}

#[test]
fn test_tie_leaves_balance_unchanged() {
    let dataset = Dataset::new(
        1,
        60,
        vec![
            candle(1, T0, dec!(1.1), dec!(1.1)),
            candle(1, T0 + 60, dec!(1.1), dec!(1.1)),
            candle(1, T0 + 120, dec!(1.1), dec!(1.2)),
        ],
    );
    let mut env = BacktestEnvironment::new(vec![dataset], config(dec!(50)));
    let mut agent = Script::new(
        vec![Sensor::candle(1, 60)],
        vec![vec![Action::trade(1, Direction::Put, dec!(25), 60)]],
    );
    let report = env.replay(&mut agent).unwrap();

    assert_eq!(report.trades[0].close_reason, Some(CloseReason::Tie));
    assert_eq!(report.trades[0].pnl, Some(Decimal::ZERO));
    assert_eq!(report.final_balance, dec!(50));
    assert_eq!(report.summary.ties, 1);
    assert_eq!(report.snapshot.win_count + report.snapshot.loss_count, 0);
}

#[test]
fn test_bust_stops_replay_and_fails_rest_of_batch() {
    let mut env = BacktestEnvironment::new(vec![wavy_dataset(1, 20)], config(dec!(10)));
    let mut agent = Script::new(
        vec![Sensor::candle(1, 60)],
        vec![vec![
            Action::trade(1, Direction::Call, dec!(10), 60),
            Action::trade(1, Direction::Put, dec!(1), 60),
        ]],
    );
    let failed = Arc::new(Mutex::new(Vec::new()));
    let seen = failed.clone();
    env.bus().subscribe(EventType::ActionFailed, move |e| {
        seen.lock().unwrap().push(e.payload["error"].clone());
    });

    let report = env.replay(&mut agent).unwrap();
    assert!(report.halted);
    assert_eq!(report.candles_replayed, 1);
    assert_eq!(report.trades.len(), 1);
    assert_eq!(agent.results.len(), 1);
    assert_eq!(*failed.lock().unwrap(), vec![serde_json::json!("Run halted")]);
}

#[test]
fn test_streak_reversal_replays_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eurusd.json");
    let rows: Vec<serde_json::Value> = wavy_dataset(1, 120)
        .candles()
        .iter()
        .map(|c| {
            serde_json::json!({
                "from": c.period_start.timestamp(),
                "open": c.open, "close": c.close, "min": c.low, "max": c.high,
            })
        })
        .collect();
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        "{}",
        serde_json::json!({ "instrument_id": 1, "period_seconds": 60, "candles": rows })
    )
    .unwrap();

    let mut env = BacktestEnvironment::from_files(&[&path], config(dec!(100))).unwrap();
    let mut agent = StreakReversal::new(CandleRunParams::new(1, 60));
    let report = env.replay(&mut agent).unwrap();

    assert_eq!(report.candles_replayed, 120);
    assert_eq!(report.agent, "streak-reversal");
    assert_eq!(report.final_balance, dec!(100) + report.summary.net_pnl);
}

#[test]
fn test_trait_driven_run_matches_direct_replay() {
    use blitz_trader::env::TradingEnvironment;

    let direct = run_momentum(wavy_dataset(1, 150)).0;

    let mut env = BacktestEnvironment::new(vec![wavy_dataset(1, 150)], config(dec!(1000)));
    let mut params = CandleRunParams::new(1, 60);
    params.invest = dec!(10);
    let mut agent = CandleMomentum::new(params);
    let via_trait = tokio_test::block_on(env.run_agent(&mut agent)).unwrap();

    assert_eq!(via_trait.trades, direct.trades);
    assert_eq!(via_trait.final_balance, direct.final_balance);
    assert_eq!(env.snapshot().closed_count, direct.snapshot.closed_count);
}
