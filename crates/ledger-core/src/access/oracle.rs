//! ============================================================================
//! Balance Oracle - Read-only view of the fungible token ledger
//! ============================================================================
//! The access ledger never mutates balances. It only asks an oracle what an
//! account holds at the moment an admission is decided.
//! ============================================================================

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::types::{Account, Amount};

/// Source of fungible token balances
pub trait BalanceOracle: Send + Sync {
    /// Total balance held by `account`. Unknown accounts hold zero.
    fn balance_of(&self, account: &Account) -> Amount;
}

impl<T: BalanceOracle + ?Sized> BalanceOracle for Arc<T> {
    fn balance_of(&self, account: &Account) -> Amount {
        (**self).balance_of(account)
    }
}

impl<T: BalanceOracle + ?Sized> BalanceOracle for &T {
    fn balance_of(&self, account: &Account) -> Amount {
        (**self).balance_of(account)
    }
}

/// In-process balance table, fed by whatever owns the token ledger
#[derive(Debug, Default)]
pub struct InMemoryBalances {
    balances: RwLock<HashMap<Account, Amount>>,
}

impl InMemoryBalances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table from (account, balance) pairs
    pub fn with_balances(entries: impl IntoIterator<Item = (Account, Amount)>) -> Self {
        Self {
            balances: RwLock::new(entries.into_iter().collect()),
        }
    }

    /// Record a balance update observed on the token ledger
    pub fn set_balance(&self, account: Account, amount: Amount) {
        let mut balances = self.balances.write().unwrap_or_else(|e| e.into_inner());
        balances.insert(account, amount);
        debug!("Balance for {} set to {}", account, amount);
    }

    pub fn len(&self) -> usize {
        self.balances.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BalanceOracle for InMemoryBalances {
    fn balance_of(&self, account: &Account) -> Amount {
        let balances = self.balances.read().unwrap_or_else(|e| e.into_inner());
        balances.get(account).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_account_has_zero_balance() {
        let oracle = InMemoryBalances::new();
        assert_eq!(oracle.balance_of(&Account::random()), 0);
        assert!(oracle.is_empty());
    }

    #[test]
    fn test_set_balance_overwrites() {
        let account = Account::random();
        let oracle = InMemoryBalances::with_balances([(account, 50)]);
        assert_eq!(oracle.balance_of(&account), 50);

        oracle.set_balance(account, 150);
        assert_eq!(oracle.balance_of(&account), 150);
        assert_eq!(oracle.len(), 1);
    }

    #[test]
    fn test_shared_oracle_sees_updates() {
        let account = Account::random();
        let oracle = Arc::new(InMemoryBalances::new());
        let view: Arc<dyn BalanceOracle> = oracle.clone();

        oracle.set_balance(account, 42);
        assert_eq!(view.balance_of(&account), 42);
    }
}
