use blitz_trader::cli::{Cli, Commands};
use blitz_trader::config::Config;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize telemetry
    blitz_trader::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting live trading mode");
            args.execute(&config).await?;
        }
        Commands::Backtest(args) => {
            tracing::info!("Starting backtest");
            args.execute(&config).await?;
        }
        Commands::Config => {
            let auth = if config.auth.token.is_some() {
                "token"
            } else if config.auth.login_url.is_some() {
                "credentials"
            } else {
                "none"
            };
            println!("Current configuration:");
            println!(
                "  Connection: {} (timeout {}ms, max reconnects {})",
                config.connection.ws_url,
                config.connection.request_timeout_ms,
                config.connection.max_reconnect_attempts
            );
            println!("  Auth: {}", auth);
            println!(
                "  Trading: {:?} account, buffers {}, min stake {}",
                config.trading.account_mode,
                config.trading.buffer_capacity,
                config.trading.min_stake_floor
            );
            println!(
                "  Backtest: balance {}, payout {}%, {} dataset(s)",
                config.backtest.initial_balance,
                config.backtest.profit_percent,
                config.backtest.datasets.len()
            );
            println!(
                "  Telemetry: level {}, format {:?}, metrics port {:?}",
                config.telemetry.log_level,
                config.telemetry.log_format,
                config.telemetry.metrics_port
            );
        }
    }

    Ok(())
}
