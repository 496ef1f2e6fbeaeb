//! Agent context

use crate::clock::Clock;
use crate::events::{EventBus, EventType};
use crate::state::WalletView;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// What an agent may do besides returning actions: read the time and the
/// wallet, and emit signal or debug events.
#[derive(Debug, Clone)]
pub struct AgentContext {
    bus: EventBus,
    wallet: WalletView,
    agent: String,
}

impl AgentContext {
    pub fn new(bus: EventBus, wallet: WalletView, agent: impl Into<String>) -> Self {
        Self {
            bus,
            wallet,
            agent: agent.into(),
        }
    }

    /// Wall time live, replay time in backtest
    pub fn now(&self) -> DateTime<Utc> {
        self.bus.clock().now()
    }

    pub fn clock(&self) -> &Clock {
        self.bus.clock()
    }

    pub fn run_id(&self) -> &str {
        self.bus.run_id()
    }

    /// Read-only wallet figures at the time the context was handed out
    pub fn wallet(&self) -> WalletView {
        self.wallet
    }

    pub fn emit_signal(&self, signal: impl Into<String>, details: Value) {
        self.bus.emit(
            EventType::AgentSignal,
            json!({ "agent": self.agent, "signal": signal.into(), "details": details }),
        );
    }

    pub fn emit_debug(&self, message: impl Into<String>, details: Value) {
        self.bus.emit(
            EventType::AgentDebug,
            json!({ "agent": self.agent, "message": message.into(), "details": details }),
        );
    }
}
