//! Run command implementation

use super::{attach_event_log, StrategyKind};
use crate::agent::strategies::CandleRunParams;
use crate::clock::Clock;
use crate::config::Config;
use crate::env::{LiveConfig, LiveEnvironment, TradingEnvironment};
use crate::events::EventBus;
use crate::market::InstrumentId;
use crate::protocol::{AuthChain, ProtocolClient};
use crate::transport::TransportConfig;
use crate::venue::ProtocolVenue;
use anyhow::Context;
use clap::Args;
use rust_decimal::Decimal;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Instrument to trade
    #[arg(long)]
    pub instrument: InstrumentId,

    /// Candle period in seconds
    #[arg(long, default_value = "60")]
    pub period: u32,

    /// Strategy to run
    #[arg(long, value_enum, default_value = "candle-momentum")]
    pub strategy: StrategyKind,

    /// Candles in a run before the strategy enters
    #[arg(long, default_value = "3")]
    pub run_length: usize,

    /// Stake per trade
    #[arg(long, default_value = "1")]
    pub invest: Decimal,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let auth = AuthChain::from_config(&config.auth)
            .context("Live trading needs a session token or login credentials")?;
        let client = ProtocolClient::connect(
            TransportConfig::from(&config.connection),
            config.connection.request_timeout(),
            auth,
        )
        .await
        .context("Failed to open venue session")?;

        let bus = EventBus::new(Clock::Wall);
        let event_log = attach_event_log(&bus, &config.telemetry)?;
        let mut env = LiveEnvironment::new(
            ProtocolVenue::new(client),
            LiveConfig::from(&config.trading),
            bus,
        );

        let mut params = CandleRunParams::new(self.instrument, self.period);
        params.run_length = self.run_length;
        params.invest = self.invest;
        let mut agent = self.strategy.build(params);

        tracing::info!(
            strategy = agent.name(),
            instrument = self.instrument,
            period = self.period,
            mode = ?config.trading.account_mode,
            "Starting live trading"
        );
        let snapshot = env.run_agent(agent.as_mut()).await?;

        if let Some(log) = event_log {
            log.flush().context("Failed to flush event log")?;
        }
        println!(
            "Stopped: balance {:.2}, closed {}, wins {}, losses {}, pnl {:+.2}",
            snapshot.balance,
            snapshot.closed_count,
            snapshot.win_count,
            snapshot.loss_count,
            snapshot.total_pnl
        );
        Ok(())
    }
}
