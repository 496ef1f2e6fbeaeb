//! blitz-trader: Automated short-duration binary option trading
//!
//! This library provides the core components for:
//! - A reconnecting WebSocket transport and request/response correlation
//! - Typed push subscriptions that survive reconnects
//! - Bounded sensor buffers for candles, mood, positions and orders
//! - Position, balance and drawdown bookkeeping
//! - One environment interface over a live venue or a deterministic backtest
//! - Reference candle-run strategies
//! - Trading event stream with pluggable sinks
//! - Structured logging and Prometheus metrics

pub mod agent;
pub mod backtest;
pub mod cli;
pub mod clock;
pub mod config;
pub mod env;
pub mod events;
pub mod market;
pub mod protocol;
pub mod sensor;
pub mod state;
pub mod telemetry;
pub mod transport;
pub mod venue;
