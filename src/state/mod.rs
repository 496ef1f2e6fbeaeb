//! Environment state
//!
//! Position lifecycle, the balance and statistics ledger, and the wallet

mod ledger;
mod position;
mod wallet;

pub use ledger::{EnvironmentSnapshot, EnvironmentState, PositionChange, RECENT_CLOSED_CAPACITY};
pub use position::{CloseReason, Outcome, Position, PositionId, PositionStatus};
pub use wallet::{Wallet, WalletError, WalletView};
