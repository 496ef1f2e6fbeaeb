//! Sensor buffers
//!
//! Sensors are named, bounded buffers of push data. Candle buffers replace
//! their last entry on a mid-period update; every other kind appends.

mod manager;
mod types;

pub use manager::{ListenerId, SensorManager, UpdateListener, DEFAULT_CAPACITY};
pub use types::{BalanceUpdate, Mood, Sensor, SensorId, SensorItem, SensorKind, SensorParams};
