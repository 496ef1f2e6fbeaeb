//! Trading events
//!
//! One bus per run, cloned into every component that emits. Sinks persist
//! the stream; handlers observe it synchronously.

mod bus;
mod sink;
mod types;

pub use bus::{EventBus, SinkHandle, SubscriberId};
pub use sink::{BufferedSink, EventSink, JsonLinesSink, MemorySink, SinkError};
pub use types::{EventType, TradingEvent};
