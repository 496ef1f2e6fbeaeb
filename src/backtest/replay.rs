//! Chronological candle replay across datasets

use crate::market::{Candle, Dataset};
use chrono::{DateTime, Utc};

/// Merges every dataset into one stream and yields candles in time order.
///
/// Candles sharing a period start keep the order of their datasets.
#[derive(Debug, Clone)]
pub struct Timeline {
    candles: Vec<Candle>,
    cursor: usize,
}

impl Timeline {
    pub fn new(datasets: &[Dataset]) -> Self {
        let mut candles: Vec<Candle> = datasets
            .iter()
            .flat_map(|d| d.candles().iter().cloned())
            .collect();
        // stable: ties stay in dataset order
        candles.sort_by_key(|c| c.period_start);
        Self { candles, cursor: 0 }
    }

    /// Period start of the first candle
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.candles.first().map(|c| c.period_start)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Candles already yielded
    pub fn replayed(&self) -> usize {
        self.cursor
    }
}

impl Iterator for Timeline {
    type Item = Candle;

    fn next(&mut self) -> Option<Self::Item> {
        let candle = self.candles.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(candle)
    }
}
