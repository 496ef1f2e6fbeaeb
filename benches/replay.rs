//! Benchmarks for backtest replay and settlement

use blitz_trader::agent::strategies::{CandleMomentum, CandleRunParams, StreakReversal};
use blitz_trader::backtest::{BacktestConfig, BacktestEnvironment, PendingTrade};
use blitz_trader::market::{Candle, Dataset, Direction};
use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn synthetic_dataset(len: i64) -> Dataset {
    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut price = dec!(1.1000);
    let candles = (0..len)
        .map(|i| {
            let period_start = start + chrono::Duration::seconds(i * 60);
            let open = price;
            let step = dec!(0.0001) * Decimal::from(1 + i % 4);
            price = if (i / 4 + i / 9) % 2 == 0 { price + step } else { price - step };
            Candle {
                instrument_id: 1,
                period_seconds: 60,
                period_start,
                period_end: period_start + chrono::Duration::seconds(60),
                open,
                close: price,
                low: open.min(price),
                high: open.max(price),
                volume: dec!(10),
            }
        })
        .collect();
    Dataset::new(1, 60, candles)
}

fn benchmark_momentum_replay(c: &mut Criterion) {
    let dataset = synthetic_dataset(5_000);

    c.bench_function("replay_candle_momentum_5k", |b| {
        b.iter(|| {
            let mut env = BacktestEnvironment::new(vec![dataset.clone()], BacktestConfig::default());
            let mut agent = CandleMomentum::new(CandleRunParams::new(1, 60));
            black_box(env.replay(&mut agent).map(|r| r.final_balance))
        })
    });
}

fn benchmark_streak_replay(c: &mut Criterion) {
    let dataset = synthetic_dataset(5_000);

    c.bench_function("replay_streak_reversal_5k", |b| {
        b.iter(|| {
            let mut env = BacktestEnvironment::new(vec![dataset.clone()], BacktestConfig::default());
            let mut agent = StreakReversal::new(CandleRunParams::new(1, 60));
            black_box(env.replay(&mut agent).map(|r| r.final_balance))
        })
    });
}

fn benchmark_settlement(c: &mut Criterion) {
    let open_time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let trade = PendingTrade {
        id: "bt-1".to_string(),
        instrument_id: 1,
        direction: Direction::Call,
        invest: dec!(20),
        open_quote: dec!(1.1000),
        open_time,
        expiration_time: open_time + chrono::Duration::seconds(60),
        expiration_seconds: 60,
        profit_percent: dec!(85),
    };

    c.bench_function("settle_winning_call", |b| {
        b.iter(|| trade.settle(black_box(dec!(1.1010))))
    });
}

criterion_group!(
    benches,
    benchmark_momentum_replay,
    benchmark_streak_replay,
    benchmark_settlement
);
criterion_main!(benches);
