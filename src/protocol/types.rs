//! Protocol types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Canonical identity of a subscription: name, version and params
pub type SubscriptionKey = String;

/// Protocol errors surfaced to callers
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    /// No reply within the request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Connection dropped while the request was pending
    #[error("Connection lost")]
    ConnectionLost,
    /// Session is not authenticated yet
    #[error("Not authenticated")]
    NotAuthenticated,
    /// Venue rejected the request
    #[error("Request rejected (status {status:?}): {message}")]
    Rejected { status: Option<u16>, message: String },
    /// Authentication handshake failed for good
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// Client shut down
    #[error("Protocol client closed")]
    Closed,
}

/// A push event fanned out to per-name handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub name: String,
    pub msg: Value,
}

/// An active venue subscription
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub name: String,
    pub version: String,
    pub params: Value,
}

impl Subscription {
    pub fn new(name: impl Into<String>, version: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            params,
        }
    }

    /// Deterministic key. Object keys serialize sorted, so equal params
    /// always give equal keys.
    pub fn key(&self) -> SubscriptionKey {
        format!("{}@{}:{}", self.name, self.version, self.params)
    }
}

/// Connection and authentication state of the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Connecting or re-authenticating
    Connecting,
    /// Authenticated and subscriptions issued on this connection generation
    Ready { generation: u64 },
    /// Authentication fallbacks exhausted
    Failed(String),
    /// Transport stopped
    Closed,
}

/// Notification published after a successful reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconnected {
    pub generation: u64,
    /// Subscriptions re-issued on the new connection
    pub resubscribed: usize,
}
