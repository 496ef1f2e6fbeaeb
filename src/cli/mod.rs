//! CLI interface for blitz-trader
//!
//! Provides subcommands for:
//! - `run`: Trade live against the venue
//! - `backtest`: Replay candle datasets
//! - `config`: Show the effective configuration

mod backtest;
mod run;

pub use backtest::BacktestArgs;
pub use run::RunArgs;

use crate::agent::strategies::{CandleMomentum, CandleRunParams, StreakReversal};
use crate::agent::Agent;
use crate::config::TelemetryConfig;
use crate::events::{BufferedSink, EventBus, JsonLinesSink, SinkHandle};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

/// Events buffered before the event log is written
const EVENT_LOG_FLUSH_EVERY: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "blitz-trader")]
#[command(about = "Automated short-duration binary option trading with a deterministic backtester")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trade live against the venue
    Run(RunArgs),
    /// Replay candle datasets through a strategy
    Backtest(BacktestArgs),
    /// Show configuration
    Config,
}

/// Built-in strategies
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Follow a run of same-direction candles
    CandleMomentum,
    /// Bet against a run, waiting longer after each loss
    StreakReversal,
}

impl StrategyKind {
    pub fn build(self, params: CandleRunParams) -> Box<dyn Agent> {
        match self {
            StrategyKind::CandleMomentum => Box::new(CandleMomentum::new(params)),
            StrategyKind::StreakReversal => Box::new(StreakReversal::new(params)),
        }
    }
}

/// Report output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Attach the JSON-lines event log when one is configured
pub(crate) fn attach_event_log(
    bus: &EventBus,
    telemetry: &TelemetryConfig,
) -> anyhow::Result<Option<SinkHandle<JsonLinesSink>>> {
    let Some(path) = &telemetry.events_path else {
        return Ok(None);
    };
    let sink = JsonLinesSink::create(path)
        .with_context(|| format!("Failed to open event log {}", path.display()))?;
    tracing::info!(path = %path.display(), run_id = bus.run_id(), "Writing trading events");
    Ok(Some(bus.attach_sink(BufferedSink::new(sink, EVENT_LOG_FLUSH_EVERY))))
}
