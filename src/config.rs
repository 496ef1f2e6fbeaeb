//! Configuration types for blitz-trader

use crate::telemetry::LogFormat;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable consulted for a pre-issued session token
pub const SESSION_TOKEN_ENV: &str = "BLITZ_SESSION_TOKEN";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub backtest: BacktestSettings,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Venue stream connection
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Per-request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Reconnect attempts before giving up (0 = infinite)
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_initial_reconnect_delay_ms")]
    pub initial_reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

fn default_ws_url() -> String {
    "wss://ws.example-venue.com/echo/websocket".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_initial_reconnect_delay_ms() -> u64 {
    1_000
}
fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}
fn default_ping_interval_secs() -> u64 {
    20
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            request_timeout_ms: default_request_timeout_ms(),
            max_reconnect_attempts: 0,
            initial_reconnect_delay_ms: default_initial_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl ConnectionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Credential sources, tried in order: token, then login
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Pre-issued session token
    pub token: Option<String>,
    /// Credential exchange endpoint
    pub login_url: Option<String>,
    pub identifier: Option<String>,
    pub password: Option<String>,
}

/// Which venue balance to trade from
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountMode {
    Real,
    #[default]
    Practice,
    Tournament,
}

/// Live trading settings
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    #[serde(default)]
    pub account_mode: AccountMode,
    /// Capacity of every sensor buffer
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Lower bound for the catalog-derived minimum stake
    #[serde(default = "default_min_stake")]
    pub min_stake_floor: Decimal,
}

fn default_buffer_capacity() -> usize {
    100
}
fn default_min_stake() -> Decimal {
    Decimal::ONE
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            account_mode: AccountMode::Practice,
            buffer_capacity: default_buffer_capacity(),
            min_stake_floor: default_min_stake(),
        }
    }
}

/// Backtest settings
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// Payout applied to winning trades, in percent
    #[serde(default = "default_profit_percent")]
    pub profit_percent: Decimal,
    #[serde(default = "default_min_stake")]
    pub min_stake: Decimal,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Dataset files replayed in chronological order
    #[serde(default)]
    pub datasets: Vec<PathBuf>,
}

fn default_initial_balance() -> Decimal {
    Decimal::new(1000, 0)
}
fn default_profit_percent() -> Decimal {
    Decimal::new(85, 0)
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            profit_percent: default_profit_percent(),
            min_stake: default_min_stake(),
            buffer_capacity: default_buffer_capacity(),
            datasets: Vec::new(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus exporter port, disabled when absent
    pub metrics_port: Option<u16>,
    /// JSON-lines trading event log, disabled when absent
    pub events_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
            events_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_config_deserialize() {
        let toml = r#"
            [connection]
            ws_url = "wss://venue.test/ws"
            request_timeout_ms = 5000
            max_reconnect_attempts = 3

            [auth]
            token = "abc"

            [trading]
            account_mode = "real"
            buffer_capacity = 200

            [backtest]
            initial_balance = 500
            profit_percent = 87
            datasets = ["data/eurusd.json"]

            [telemetry]
            log_level = "debug"
            log_format = "json"
            metrics_port = 9090
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.connection.ws_url, "wss://venue.test/ws");
        assert_eq!(config.connection.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.auth.token.as_deref(), Some("abc"));
        assert_eq!(config.trading.account_mode, AccountMode::Real);
        assert_eq!(config.trading.buffer_capacity, 200);
        assert_eq!(config.backtest.initial_balance, dec!(500));
        assert_eq!(config.backtest.profit_percent, dec!(87));
        assert_eq!(config.backtest.datasets.len(), 1);
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
        assert_eq!(config.telemetry.metrics_port, Some(9090));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.connection.request_timeout_ms, 10_000);
        assert_eq!(config.connection.max_reconnect_attempts, 0);
        assert_eq!(config.trading.account_mode, AccountMode::Practice);
        assert_eq!(config.trading.buffer_capacity, 100);
        assert_eq!(config.backtest.initial_balance, dec!(1000));
        assert_eq!(config.backtest.profit_percent, dec!(85));
        assert_eq!(config.telemetry.log_level, "info");
        assert!(config.telemetry.metrics_port.is_none());
    }

    #[test]
    fn test_partial_section_defaults() {
        let toml = r#"
            [backtest]
            min_stake = 5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.backtest.min_stake, dec!(5));
        assert_eq!(config.backtest.buffer_capacity, 100);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }
}
