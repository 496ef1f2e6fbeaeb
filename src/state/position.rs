//! Position lifecycle

use crate::market::{Direction, InstrumentId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Position identifier, venue-assigned live and sequential in backtest
pub type PositionId = String;

/// Position status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    /// Expired in the money
    Win,
    /// Expired out of the money
    Loss,
    /// Expired at the open quote, stake refunded
    Tie,
    /// Closed early on the venue
    Sold,
}

/// Settled result of a closed position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Tie,
}

impl CloseReason {
    /// Classify the close. Early sales count by the sign of their pnl.
    pub fn outcome(self, pnl: Decimal) -> Outcome {
        match self {
            CloseReason::Win => Outcome::Win,
            CloseReason::Loss => Outcome::Loss,
            CloseReason::Tie => Outcome::Tie,
            CloseReason::Sold if pnl > Decimal::ZERO => Outcome::Win,
            CloseReason::Sold if pnl < Decimal::ZERO => Outcome::Loss,
            CloseReason::Sold => Outcome::Tie,
        }
    }
}

/// A binary option position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub instrument_id: InstrumentId,
    pub direction: Direction,
    /// Stake
    pub invest: Decimal,
    pub open_quote: Decimal,
    pub open_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub status: PositionStatus,
    pub close_quote: Option<Decimal>,
    pub close_reason: Option<CloseReason>,
    pub close_time: Option<DateTime<Utc>>,
    pub pnl: Option<Decimal>,
}

impl Position {
    /// Create an open position
    pub fn open(
        id: impl Into<PositionId>,
        instrument_id: InstrumentId,
        direction: Direction,
        invest: Decimal,
        open_quote: Decimal,
        open_time: DateTime<Utc>,
        expiration_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            instrument_id,
            direction,
            invest,
            open_quote,
            open_time,
            expiration_time,
            status: PositionStatus::Open,
            close_quote: None,
            close_reason: None,
            close_time: None,
            pnl: None,
        }
    }

    /// Return the closed form of this position
    pub fn closed(
        mut self,
        close_quote: Decimal,
        reason: CloseReason,
        close_time: DateTime<Utc>,
        pnl: Decimal,
    ) -> Self {
        self.status = PositionStatus::Closed;
        self.close_quote = Some(close_quote);
        self.close_reason = Some(reason);
        self.close_time = Some(close_time);
        self.pnl = Some(pnl);
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Outcome of a closed position, `None` while open
    pub fn outcome(&self) -> Option<Outcome> {
        let reason = self.close_reason?;
        Some(reason.outcome(self.pnl.unwrap_or_default()))
    }
}
