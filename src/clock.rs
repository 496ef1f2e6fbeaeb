//! Time source shared by an environment, its agent context and its event bus

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Wall clock in live mode, a replay-driven cell in backtest
#[derive(Debug, Clone, Default)]
pub enum Clock {
    #[default]
    Wall,
    /// Epoch seconds advanced by the replay loop
    Simulated(Arc<AtomicI64>),
}

impl Clock {
    /// A simulated clock starting at `start`
    pub fn simulated(start: DateTime<Utc>) -> Self {
        Clock::Simulated(Arc::new(AtomicI64::new(start.timestamp())))
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Wall => Utc::now(),
            Clock::Simulated(secs) => Utc
                .timestamp_opt(secs.load(Ordering::SeqCst), 0)
                .single()
                .unwrap_or_default(),
        }
    }

    /// Move simulated time forward. Never moves backwards; a no-op on the
    /// wall clock.
    pub fn advance_to(&self, time: DateTime<Utc>) {
        if let Clock::Simulated(secs) = self {
            secs.fetch_max(time.timestamp(), Ordering::SeqCst);
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Clock::Simulated(_))
    }
}
