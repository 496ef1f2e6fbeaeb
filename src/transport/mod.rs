//! Venue transport
//!
//! One logical WebSocket connection with automatic reconnection and
//! ping/pong handling, plus the JSON frame codec spoken over it.

mod client;
mod frame;
mod types;

pub use client::WsClient;
pub use frame::{Frame, FrameError, ERROR_STATUS_FLOOR};
pub use types::{TransportConfig, TransportError, TransportEvent};
