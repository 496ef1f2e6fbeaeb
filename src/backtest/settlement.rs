//! Binary option settlement

use crate::market::{Direction, InstrumentId};
use crate::state::{CloseReason, Position, PositionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A simulated trade awaiting expiration
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTrade {
    pub id: PositionId,
    pub instrument_id: InstrumentId,
    pub direction: Direction,
    pub invest: Decimal,
    pub open_quote: Decimal,
    pub open_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub expiration_seconds: u32,
    pub profit_percent: Decimal,
}

/// Outcome of settling a trade at a close quote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub reason: CloseReason,
    pub pnl: Decimal,
    /// Amount returned to the wallet; the stake was debited at placement
    pub credit: Decimal,
}

impl PendingTrade {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time <= now
    }

    /// Settle against `close_quote`
    pub fn settle(&self, close_quote: Decimal) -> Settlement {
        if close_quote == self.open_quote {
            return Settlement {
                reason: CloseReason::Tie,
                pnl: Decimal::ZERO,
                credit: self.invest,
            };
        }

        let won = match self.direction {
            Direction::Call => close_quote > self.open_quote,
            Direction::Put => close_quote < self.open_quote,
        };
        if won {
            let pnl = self.invest * self.profit_percent / dec!(100);
            Settlement {
                reason: CloseReason::Win,
                pnl,
                credit: self.invest + pnl,
            }
        } else {
            Settlement {
                reason: CloseReason::Loss,
                pnl: -self.invest,
                credit: Decimal::ZERO,
            }
        }
    }

    /// The open position this trade is reported as
    pub fn position(&self) -> Position {
        Position::open(
            self.id.clone(),
            self.instrument_id,
            self.direction,
            self.invest,
            self.open_quote,
            self.open_time,
            self.expiration_time,
        )
    }
}
