//! Environment state ledger

use super::position::{Outcome, Position, PositionId};
use crate::market::Instrument;
use crate::telemetry::{set_gauge, GaugeMetric};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Capacity of the recently closed ring
pub const RECENT_CLOSED_CAPACITY: usize = 50;

/// Point-in-time copy of the environment state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub balance: Decimal,
    /// Open positions ordered by id
    pub open_positions: Vec<Position>,
    pub closed_count: u64,
    pub win_count: u64,
    pub loss_count: u64,
    pub total_pnl: Decimal,
    pub peak: Decimal,
    pub drawdown: Decimal,
    pub max_drawdown: Decimal,
    /// Signed run length: positive for wins, negative for losses
    pub streak: i64,
    /// Most recent closed positions, oldest first
    pub recent_closed: Vec<Position>,
    pub available_instruments: Vec<Instrument>,
    pub server_time: Option<DateTime<Utc>>,
}

impl EnvironmentSnapshot {
    /// Wins over decided trades, zero before the first decision
    pub fn win_rate(&self) -> Decimal {
        let decided = self.win_count + self.loss_count;
        if decided == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.win_count) / Decimal::from(decided)
    }
}

/// What a position change did to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionChange {
    /// New open position
    Opened,
    /// Existing open position replaced
    Updated,
    /// Position moved to the closed ring
    Closed,
    /// Close for a position already recorded as closed
    Ignored,
}

/// Balance, positions and win/loss statistics for one environment
#[derive(Debug, Default)]
pub struct EnvironmentState {
    balance: Decimal,
    open_positions: BTreeMap<PositionId, Position>,
    closed_ids: HashSet<PositionId>,
    closed_count: u64,
    win_count: u64,
    loss_count: u64,
    total_pnl: Decimal,
    peak: Decimal,
    drawdown: Decimal,
    max_drawdown: Decimal,
    streak: i64,
    recent_closed: VecDeque<Position>,
    available_instruments: Vec<Instrument>,
    server_time: Option<DateTime<Utc>>,
}

impl EnvironmentState {
    /// Create a ledger with a starting balance
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance,
            ..Default::default()
        }
    }

    /// Apply a position update. This is the only path that touches
    /// positions and the derived statistics.
    pub fn on_position_changed(&mut self, position: Position) -> PositionChange {
        if position.is_open() {
            if self.closed_ids.contains(&position.id) {
                tracing::debug!(position_id = %position.id, "Open update for closed position ignored");
                return PositionChange::Ignored;
            }
            let replaced = self
                .open_positions
                .insert(position.id.clone(), position)
                .is_some();
            self.publish_gauges();
            return if replaced {
                PositionChange::Updated
            } else {
                PositionChange::Opened
            };
        }

        if !self.closed_ids.insert(position.id.clone()) {
            tracing::debug!(position_id = %position.id, "Duplicate close ignored");
            return PositionChange::Ignored;
        }

        self.open_positions.remove(&position.id);
        self.closed_count += 1;

        let pnl = position.pnl.unwrap_or_default();
        self.total_pnl += pnl;

        match position.outcome() {
            Some(Outcome::Win) => {
                self.win_count += 1;
                self.streak = self.streak.max(0) + 1;
            }
            Some(Outcome::Loss) => {
                self.loss_count += 1;
                self.streak = self.streak.min(0) - 1;
            }
            Some(Outcome::Tie) | None => {}
        }

        self.peak = self.peak.max(self.total_pnl);
        self.drawdown = self.peak - self.total_pnl;
        self.max_drawdown = self.max_drawdown.max(self.drawdown);

        if self.recent_closed.len() >= RECENT_CLOSED_CAPACITY {
            self.recent_closed.pop_front();
        }
        self.recent_closed.push_back(position);

        self.publish_gauges();
        PositionChange::Closed
    }

    /// Record the venue or wallet balance
    pub fn set_balance(&mut self, balance: Decimal) {
        self.balance = balance;
        set_gauge(GaugeMetric::Balance, balance.to_f64().unwrap_or_default());
    }

    /// Replace the tradable instrument list
    pub fn set_instruments(&mut self, instruments: Vec<Instrument>) {
        self.available_instruments = instruments;
    }

    /// Record the latest known server or simulated time
    pub fn set_server_time(&mut self, time: DateTime<Utc>) {
        self.server_time = Some(time);
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn total_pnl(&self) -> Decimal {
        self.total_pnl
    }

    pub fn drawdown(&self) -> Decimal {
        self.drawdown
    }

    pub fn max_drawdown(&self) -> Decimal {
        self.max_drawdown
    }

    pub fn open_count(&self) -> usize {
        self.open_positions.len()
    }

    pub fn open_position(&self, id: &str) -> Option<&Position> {
        self.open_positions.get(id)
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.available_instruments
    }

    pub fn recent_closed(&self) -> impl Iterator<Item = &Position> {
        self.recent_closed.iter()
    }

    /// Independent copy of the current state
    pub fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            balance: self.balance,
            open_positions: self.open_positions.values().cloned().collect(),
            closed_count: self.closed_count,
            win_count: self.win_count,
            loss_count: self.loss_count,
            total_pnl: self.total_pnl,
            peak: self.peak,
            drawdown: self.drawdown,
            max_drawdown: self.max_drawdown,
            streak: self.streak,
            recent_closed: self.recent_closed.iter().cloned().collect(),
            available_instruments: self.available_instruments.clone(),
            server_time: self.server_time,
        }
    }

    fn publish_gauges(&self) {
        set_gauge(GaugeMetric::OpenPositions, self.open_positions.len() as f64);
        set_gauge(
            GaugeMetric::TotalPnl,
            self.total_pnl.to_f64().unwrap_or_default(),
        );
        set_gauge(
            GaugeMetric::Drawdown,
            self.drawdown.to_f64().unwrap_or_default(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Direction;
    use crate::state::CloseReason;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn open(id: &str) -> Position {
        let now = Utc::now();
        Position::open(
            id,
            1,
            Direction::Call,
            dec!(10),
            dec!(1.0),
            now,
            now + Duration::seconds(60),
        )
    }

    fn close(id: &str, reason: CloseReason, pnl: Decimal) -> Position {
        let pos = open(id);
        let t = pos.expiration_time;
        pos.closed(dec!(1.0), reason, t, pnl)
    }

    #[test]
    fn test_open_then_update_upserts() {
        let mut state = EnvironmentState::new(dec!(100));
        assert_eq!(state.on_position_changed(open("a")), PositionChange::Opened);
        assert_eq!(state.on_position_changed(open("a")), PositionChange::Updated);
        assert_eq!(state.open_count(), 1);
    }

    #[test]
    fn test_close_updates_statistics() {
        let mut state = EnvironmentState::new(dec!(100));
        state.on_position_changed(open("a"));
        let change = state.on_position_changed(close("a", CloseReason::Win, dec!(8.5)));

        assert_eq!(change, PositionChange::Closed);
        let snap = state.snapshot();
        assert_eq!(snap.open_positions.len(), 0);
        assert_eq!(snap.closed_count, 1);
        assert_eq!(snap.win_count, 1);
        assert_eq!(snap.total_pnl, dec!(8.5));
        assert_eq!(snap.peak, dec!(8.5));
        assert_eq!(snap.drawdown, dec!(0));
        assert_eq!(snap.streak, 1);
        assert_eq!(snap.recent_closed.len(), 1);
    }

    #[test]
    fn test_duplicate_close_ignored() {
        let mut state = EnvironmentState::new(dec!(100));
        state.on_position_changed(close("a", CloseReason::Loss, dec!(-10)));
        let change = state.on_position_changed(close("a", CloseReason::Loss, dec!(-10)));
        assert_eq!(change, PositionChange::Ignored);
        assert_eq!(state.snapshot().closed_count, 1);
        assert_eq!(state.total_pnl(), dec!(-10));
    }

    #[test]
    fn test_streak_resets_sign() {
        let mut state = EnvironmentState::new(dec!(100));
        state.on_position_changed(close("a", CloseReason::Win, dec!(1)));
        state.on_position_changed(close("b", CloseReason::Win, dec!(1)));
        assert_eq!(state.snapshot().streak, 2);
        state.on_position_changed(close("c", CloseReason::Loss, dec!(-1)));
        assert_eq!(state.snapshot().streak, -1);
        state.on_position_changed(close("d", CloseReason::Tie, dec!(0)));
        assert_eq!(state.snapshot().streak, -1);
        state.on_position_changed(close("e", CloseReason::Loss, dec!(-1)));
        assert_eq!(state.snapshot().streak, -2);
        state.on_position_changed(close("f", CloseReason::Win, dec!(1)));
        assert_eq!(state.snapshot().streak, 1);
    }

    #[test]
    fn test_tie_is_not_win_or_loss() {
        let mut state = EnvironmentState::new(dec!(100));
        state.on_position_changed(close("a", CloseReason::Tie, dec!(0)));
        let snap = state.snapshot();
        assert_eq!(snap.closed_count, 1);
        assert_eq!(snap.win_count, 0);
        assert_eq!(snap.loss_count, 0);
    }

    #[test]
    fn test_max_drawdown_non_decreasing() {
        let mut state = EnvironmentState::new(dec!(100));
        let pnls = [
            dec!(5),
            dec!(-10),
            dec!(-10),
            dec!(17),
            dec!(17),
            dec!(-10),
            dec!(0),
            dec!(-10),
            dec!(17),
        ];
        let mut last_max = Decimal::ZERO;
        for (i, pnl) in pnls.iter().enumerate() {
            let reason = if *pnl > Decimal::ZERO {
                CloseReason::Win
            } else if *pnl < Decimal::ZERO {
                CloseReason::Loss
            } else {
                CloseReason::Tie
            };
            state.on_position_changed(close(&format!("p{i}"), reason, *pnl));
            let snap = state.snapshot();
            assert!(snap.max_drawdown >= last_max);
            assert_eq!(snap.drawdown, snap.peak - snap.total_pnl);
            assert!(snap.peak >= snap.total_pnl);
            last_max = snap.max_drawdown;
        }
        // peak 19 after the two wins, then down to -1
        assert_eq!(state.max_drawdown(), dec!(20));
    }

    #[test]
    fn test_recent_closed_ring_is_capped() {
        let mut state = EnvironmentState::new(dec!(100));
        for i in 0..(RECENT_CLOSED_CAPACITY + 5) {
            state.on_position_changed(close(&format!("p{i}"), CloseReason::Loss, dec!(-1)));
        }
        let snap = state.snapshot();
        assert_eq!(snap.recent_closed.len(), RECENT_CLOSED_CAPACITY);
        assert_eq!(snap.recent_closed[0].id, "p5");
        assert_eq!(snap.closed_count as usize, RECENT_CLOSED_CAPACITY + 5);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut state = EnvironmentState::new(dec!(100));
        state.on_position_changed(open("a"));
        let snap = state.snapshot();
        state.on_position_changed(close("a", CloseReason::Win, dec!(8)));
        assert_eq!(snap.open_positions.len(), 1);
        assert_eq!(snap.closed_count, 0);
    }

    #[test]
    fn test_win_rate() {
        let mut state = EnvironmentState::new(dec!(100));
        assert_eq!(state.snapshot().win_rate(), dec!(0));
        state.on_position_changed(close("a", CloseReason::Win, dec!(1)));
        state.on_position_changed(close("b", CloseReason::Loss, dec!(-1)));
        assert_eq!(state.snapshot().win_rate(), dec!(0.5));
    }
}
