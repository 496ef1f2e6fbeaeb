//! Backtest command implementation

use super::{attach_event_log, OutputFormat, StrategyKind};
use crate::agent::strategies::CandleRunParams;
use crate::backtest::{BacktestConfig, BacktestEnvironment};
use crate::config::Config;
use crate::market::Dataset;
use anyhow::Context;
use clap::Args;
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct BacktestArgs {
    /// Dataset files, replayed as one chronological stream
    #[arg(long, num_args = 1..)]
    pub dataset: Vec<PathBuf>,

    /// Initial balance
    #[arg(long)]
    pub balance: Option<Decimal>,

    /// Strategy to replay
    #[arg(long, value_enum, default_value = "candle-momentum")]
    pub strategy: StrategyKind,

    /// Candles in a run before the strategy enters
    #[arg(long, default_value = "3")]
    pub run_length: usize,

    /// Stake per trade
    #[arg(long, default_value = "1")]
    pub invest: Decimal,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl BacktestArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let paths = if self.dataset.is_empty() {
            config.backtest.datasets.clone()
        } else {
            self.dataset.clone()
        };
        if paths.is_empty() {
            anyhow::bail!("No datasets given; pass --dataset or set backtest.datasets");
        }

        let datasets = paths
            .iter()
            .map(|p| Dataset::load(p).with_context(|| format!("Failed to load {}", p.display())))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let first = &datasets[0];
        let mut params = CandleRunParams::new(first.instrument_id, first.period_seconds);
        params.run_length = self.run_length;
        params.invest = self.invest;

        let mut backtest_config = BacktestConfig::from(&config.backtest);
        if let Some(balance) = self.balance {
            backtest_config.initial_balance = balance;
        }

        let mut agent = self.strategy.build(params);
        let mut env = BacktestEnvironment::new(datasets, backtest_config);
        let event_log = attach_event_log(env.bus(), &config.telemetry)?;

        tracing::info!(
            strategy = agent.name(),
            datasets = paths.len(),
            "Running backtest"
        );
        let report = env.replay(agent.as_mut())?;

        if let Some(log) = event_log {
            log.flush().context("Failed to flush event log")?;
        }

        match self.format {
            OutputFormat::Table => println!("{}", report.summary.format_table()),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }
        Ok(())
    }
}
