//! Backtest analytics and reporting

use crate::state::{EnvironmentSnapshot, Outcome, Position};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Summary statistics from a backtest
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacktestSummary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub ties: usize,
    /// Wins over decided trades
    pub win_rate: Decimal,
    pub net_pnl: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    /// Gross profit over gross loss, absent without losses
    pub profit_factor: Option<Decimal>,
    pub max_drawdown: Decimal,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    /// Balance change relative to the initial balance, in percent
    pub return_pct: Decimal,
}

impl BacktestSummary {
    /// Summarize closed trades
    pub fn from_trades(
        trades: &[Position],
        initial_balance: Decimal,
        final_balance: Decimal,
        max_drawdown: Decimal,
    ) -> Self {
        let mut summary = Self {
            total_trades: trades.len(),
            max_drawdown,
            initial_balance,
            final_balance,
            ..Default::default()
        };

        for trade in trades {
            let pnl = trade.pnl.unwrap_or_default();
            summary.net_pnl += pnl;
            match trade.outcome() {
                Some(Outcome::Win) => {
                    summary.wins += 1;
                    summary.gross_profit += pnl;
                }
                Some(Outcome::Loss) => {
                    summary.losses += 1;
                    summary.gross_loss += pnl.abs();
                }
                Some(Outcome::Tie) | None => summary.ties += 1,
            }
        }

        let decided = summary.wins + summary.losses;
        if decided > 0 {
            summary.win_rate = Decimal::from(summary.wins) / Decimal::from(decided);
        }
        if summary.gross_loss > Decimal::ZERO {
            summary.profit_factor = Some(summary.gross_profit / summary.gross_loss);
        }
        if initial_balance > Decimal::ZERO {
            summary.return_pct = (final_balance - initial_balance) / initial_balance * dec!(100);
        }
        summary
    }

    /// Format as table for CLI output
    pub fn format_table(&self) -> String {
        let profit_factor = self
            .profit_factor
            .map_or_else(|| "n/a".to_string(), |pf| format!("{:.2}", pf));
        format!(
            r#"
══════════════════════════════════════════════════════
               BACKTEST RESULTS
══════════════════════════════════════════════════════

PERFORMANCE
───────────────────────────────────────────────────────
Net P&L:          {:+.2} ({:+.2}%)
Final Balance:    {:.2} (from {:.2})
Max Drawdown:     {:.2}
Win Rate:         {:.1}%
Profit Factor:    {}

ACTIVITY
───────────────────────────────────────────────────────
Total Trades:     {}
Wins / Losses:    {} / {}
Ties:             {}
══════════════════════════════════════════════════════
"#,
            self.net_pnl,
            self.return_pct,
            self.final_balance,
            self.initial_balance,
            self.max_drawdown,
            self.win_rate * dec!(100),
            profit_factor,
            self.total_trades,
            self.wins,
            self.losses,
            self.ties,
        )
    }
}

/// Complete backtest results
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub run_id: String,
    pub agent: String,
    /// Closed trades in settlement order
    pub trades: Vec<Position>,
    pub final_balance: Decimal,
    pub snapshot: EnvironmentSnapshot,
    pub summary: BacktestSummary,
    pub candles_replayed: usize,
    /// Whether the run stopped on a bust
    pub halted: bool,
}
