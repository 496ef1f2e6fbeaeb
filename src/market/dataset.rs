//! Candle datasets used as the backtest's sole data source

use super::{Candle, InstrumentId};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Dataset loading errors
#[derive(Debug, Error)]
pub enum DatasetError {
    /// File could not be read
    #[error("Failed to read dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// File content is not a valid dataset
    #[error("Invalid dataset: {0}")]
    Parse(#[from] serde_json::Error),
    /// A row carries an out-of-range timestamp
    #[error("Invalid timestamp {0} in dataset")]
    Timestamp(i64),
    /// Dataset declares a zero-length period
    #[error("Dataset period must be positive")]
    ZeroPeriod,
}

/// On-disk dataset layout
#[derive(Debug, Deserialize)]
struct DatasetFile {
    instrument_id: InstrumentId,
    period_seconds: u32,
    candles: Vec<DatasetRow>,
}

/// One OHLCV row, timestamps in epoch seconds
#[derive(Debug, Deserialize)]
struct DatasetRow {
    from: i64,
    #[serde(default)]
    to: Option<i64>,
    open: Decimal,
    close: Decimal,
    min: Decimal,
    max: Decimal,
    #[serde(default)]
    volume: Decimal,
}

/// Ordered candle history for one instrument and period
#[derive(Debug, Clone)]
pub struct Dataset {
    pub instrument_id: InstrumentId,
    pub period_seconds: u32,
    candles: Vec<Candle>,
}

impl Dataset {
    /// Build a dataset, ordering candles by period start.
    ///
    /// Rows sharing a period start collapse to the last one, matching how
    /// a sensor buffer treats mid-period updates.
    pub fn new(instrument_id: InstrumentId, period_seconds: u32, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.period_start);
        let mut ordered: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            match ordered.last_mut() {
                Some(last) if last.period_start == candle.period_start => *last = candle,
                _ => ordered.push(candle),
            }
        }

        Self {
            instrument_id,
            period_seconds,
            candles: ordered,
        }
    }

    /// Parse a dataset from its JSON representation
    pub fn from_json(text: &str) -> Result<Self, DatasetError> {
        let file: DatasetFile = serde_json::from_str(text)?;
        if file.period_seconds == 0 {
            return Err(DatasetError::ZeroPeriod);
        }

        let period = i64::from(file.period_seconds);
        let mut candles = Vec::with_capacity(file.candles.len());
        for row in file.candles {
            let period_start = epoch(row.from)?;
            let period_end = epoch(row.to.unwrap_or(row.from + period))?;
            candles.push(Candle {
                instrument_id: file.instrument_id,
                period_seconds: file.period_seconds,
                period_start,
                period_end,
                open: row.open,
                close: row.close,
                low: row.min,
                high: row.max,
                volume: row.volume,
            });
        }

        Ok(Self::new(file.instrument_id, file.period_seconds, candles))
    }

    /// Load a dataset file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let dataset = Self::from_json(&text)?;
        tracing::info!(
            path = %path.display(),
            instrument_id = dataset.instrument_id,
            period = dataset.period_seconds,
            candles = dataset.len(),
            "Loaded dataset"
        );
        Ok(dataset)
    }

    /// All candles in chronological order
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Candles whose period starts strictly before `time`
    pub fn candles_before(&self, time: DateTime<Utc>) -> &[Candle] {
        let end = self.candles.partition_point(|c| c.period_start < time);
        &self.candles[..end]
    }

    /// First candle whose period starts at or after `time`
    pub fn first_at_or_after(&self, time: DateTime<Utc>) -> Option<&Candle> {
        let idx = self.candles.partition_point(|c| c.period_start < time);
        self.candles.get(idx)
    }
}

fn epoch(secs: i64) -> Result<DateTime<Utc>, DatasetError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(DatasetError::Timestamp(secs))
}
