//! Wallet with bust detection

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wallet errors
#[derive(Debug, Error, PartialEq)]
pub enum WalletError {
    /// Stake exceeds the available balance
    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Decimal, required: Decimal },
    /// Wallet already busted
    #[error("Wallet busted at balance {0}")]
    Busted(Decimal),
}

/// Read-only facet handed to agents
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WalletView {
    pub balance: Decimal,
    pub initial_balance: Decimal,
    pub total_pnl: Decimal,
    pub drawdown: Decimal,
    pub max_drawdown: Decimal,
}

type BustHook = Box<dyn FnMut(Decimal) + Send>;

/// Cash held by the account. Only placement and settlement mutate it.
pub struct Wallet {
    balance: Decimal,
    initial_balance: Decimal,
    busted: bool,
    on_bust: Option<BustHook>,
}

impl Wallet {
    /// Create a wallet holding `balance`
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance,
            initial_balance: balance,
            busted: false,
            on_bust: None,
        }
    }

    /// Register the callback fired once when the balance reaches zero or below
    pub fn on_bust(&mut self, hook: impl FnMut(Decimal) + Send + 'static) {
        self.on_bust = Some(Box::new(hook));
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn initial_balance(&self) -> Decimal {
        self.initial_balance
    }

    pub fn is_busted(&self) -> bool {
        self.busted
    }

    /// Whether `amount` can be staked
    pub fn can_afford(&self, amount: Decimal) -> bool {
        !self.busted && amount <= self.balance
    }

    /// Debit a stake. Bust is detected here, right after the debit.
    pub(crate) fn debit(&mut self, amount: Decimal) -> Result<Decimal, WalletError> {
        if self.busted {
            return Err(WalletError::Busted(self.balance));
        }
        if amount > self.balance {
            return Err(WalletError::InsufficientFunds {
                balance: self.balance,
                required: amount,
            });
        }

        self.balance -= amount;
        if self.balance <= Decimal::ZERO {
            self.busted = true;
            tracing::warn!(balance = %self.balance, "Wallet busted");
            if let Some(hook) = self.on_bust.as_mut() {
                hook(self.balance);
            }
        }
        Ok(self.balance)
    }

    /// Credit a settlement payout or refund
    pub(crate) fn credit(&mut self, amount: Decimal) -> Decimal {
        self.balance += amount;
        self.balance
    }

    /// Overwrite the balance with an authoritative venue value
    pub(crate) fn sync(&mut self, balance: Decimal) {
        self.balance = balance;
    }

    /// Read-only view combining the balance with ledger drawdown figures
    pub fn view(&self, total_pnl: Decimal, drawdown: Decimal, max_drawdown: Decimal) -> WalletView {
        WalletView {
            balance: self.balance,
            initial_balance: self.initial_balance,
            total_pnl,
            drawdown,
            max_drawdown,
        }
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("balance", &self.balance)
            .field("initial_balance", &self.initial_balance)
            .field("busted", &self.busted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_debit_and_credit() {
        let mut wallet = Wallet::new(dec!(100));
        assert_eq!(wallet.debit(dec!(20)).unwrap(), dec!(80));
        assert_eq!(wallet.credit(dec!(37)), dec!(117));
        assert_eq!(wallet.initial_balance(), dec!(100));
    }

    #[test]
    fn test_insufficient_funds() {
        let mut wallet = Wallet::new(dec!(10));
        let err = wallet.debit(dec!(20)).unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientFunds {
                balance: dec!(10),
                required: dec!(20)
            }
        );
        assert_eq!(wallet.balance(), dec!(10));
        assert!(!wallet.can_afford(dec!(11)));
    }

    #[test]
    fn test_bust_fires_hook_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut wallet = Wallet::new(dec!(20));
        wallet.on_bust(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(wallet.debit(dec!(20)).unwrap(), dec!(0));
        assert!(wallet.is_busted());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(wallet.debit(dec!(1)), Err(WalletError::Busted(dec!(0))));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_view() {
        let wallet = Wallet::new(dec!(50));
        let view = wallet.view(dec!(5), dec!(2), dec!(3));
        assert_eq!(view.balance, dec!(50));
        assert_eq!(view.total_pnl, dec!(5));
        assert_eq!(view.max_drawdown, dec!(3));
    }
}
