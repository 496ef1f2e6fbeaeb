//! Transport types and configuration

use std::time::Duration;
use thiserror::Error;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL to connect to
    pub url: String,
    /// Maximum reconnection attempts before giving up (0 = infinite)
    pub max_reconnect_attempts: u32,
    /// Initial delay before first reconnection attempt
    pub initial_reconnect_delay: Duration,
    /// Maximum delay between reconnection attempts
    pub max_reconnect_delay: Duration,
    /// Interval for sending ping frames
    pub ping_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            ping_interval: Duration::from_secs(20),
        }
    }
}

impl TransportConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set maximum reconnection attempts
    pub fn max_reconnects(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    /// Set initial reconnection delay
    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_reconnect_delay = d;
        self
    }

    /// Set maximum reconnection delay
    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_reconnect_delay = d;
        self
    }

    /// Set ping interval
    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }
}

impl From<&crate::config::ConnectionConfig> for TransportConfig {
    fn from(config: &crate::config::ConnectionConfig) -> Self {
        TransportConfig::new(config.ws_url.clone())
            .max_reconnects(config.max_reconnect_attempts)
            .initial_delay(Duration::from_millis(config.initial_reconnect_delay_ms))
            .max_delay(Duration::from_millis(config.max_reconnect_delay_ms))
            .ping_interval(Duration::from_secs(config.ping_interval_secs))
    }
}

/// Events reported by the transport to its single consumer
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection established. Generation 1 is the first connection,
    /// anything higher is a reconnect.
    Connected { generation: u64 },
    /// Text frame received
    Text(String),
    /// Connection lost, reconnecting after failure
    Reconnecting { attempt: u32 },
    /// Transport stopped for good
    Disconnected,
}

/// Transport errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// Maximum reconnection attempts exceeded
    #[error("Maximum reconnection attempts exceeded")]
    MaxReconnectsExceeded,
    /// Send failed
    #[error("Send failed: {0}")]
    SendFailed(String),
    /// No pong within one ping interval
    #[error("Pong timeout")]
    PongTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.initial_reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.ping_interval, Duration::from_secs(20));
    }

    #[test]
    fn test_transport_config_builder() {
        let config = TransportConfig::new("wss://trade.venue.test/echo/websocket")
            .max_reconnects(12)
            .initial_delay(Duration::from_millis(200))
            .max_delay(Duration::from_secs(8))
            .ping_interval(Duration::from_secs(5));

        assert_eq!(config.url, "wss://trade.venue.test/echo/websocket");
        assert_eq!(config.max_reconnect_attempts, 12);
        assert_eq!(config.initial_reconnect_delay, Duration::from_millis(200));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(8));
        assert_eq!(config.ping_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_from_connection_config() {
        let conn = crate::config::ConnectionConfig {
            ws_url: "wss://venue.test".to_string(),
            max_reconnect_attempts: 4,
            initial_reconnect_delay_ms: 250,
            ..Default::default()
        };
        let config = TransportConfig::from(&conn);
        assert_eq!(config.url, "wss://venue.test");
        assert_eq!(config.max_reconnect_attempts, 4);
        assert_eq!(config.initial_reconnect_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionFailed("timeout".to_string());
        assert_eq!(err.to_string(), "Connection failed: timeout");

        let err = TransportError::MaxReconnectsExceeded;
        assert_eq!(err.to_string(), "Maximum reconnection attempts exceeded");
    }
}
