//! Balance ledger seam.
//!
//! The engine does not own account balances; it calls out to an externally
//! owned ledger in debit-then-credit order, and a debit failure aborts the
//! operation before any reserve mutation. [`InMemoryLedger`] is provided for
//! tests and embedders without an external ledger.

use dashmap::DashMap;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::asset::Asset;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("insufficient funds: {user} holds {available} {asset}, needs {required}")]
    InsufficientFunds {
        user: String,
        asset: Asset,
        available: Decimal,
        required: Decimal,
    },
}

/// Externally owned account ledger.
pub trait BalanceLedger: Send + Sync {
    /// Remove `amount` of `asset` from `user`, failing without side effects
    /// if the balance is short.
    fn debit(&self, user: &str, asset: &Asset, amount: Decimal) -> Result<(), LedgerError>;

    /// Add `amount` of `asset` to `user`. Credits cannot fail.
    fn credit(&self, user: &str, asset: &Asset, amount: Decimal);

    fn balance(&self, user: &str, asset: &Asset) -> Decimal;
}

/// Concurrent in-memory ledger.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: DashMap<(String, Asset), Decimal>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/bootstrap helper: create balance out of thin air.
    pub fn mint(&self, user: &str, asset: &Asset, amount: Decimal) {
        self.credit(user, asset, amount);
    }
}

impl BalanceLedger for InMemoryLedger {
    fn debit(&self, user: &str, asset: &Asset, amount: Decimal) -> Result<(), LedgerError> {
        let key = (user.to_string(), asset.clone());
        let mut entry = self.balances.entry(key).or_insert(Decimal::ZERO);
        if *entry < amount {
            return Err(LedgerError::InsufficientFunds {
                user: user.to_string(),
                asset: asset.clone(),
                available: *entry,
                required: amount,
            });
        }
        *entry -= amount;
        Ok(())
    }

    fn credit(&self, user: &str, asset: &Asset, amount: Decimal) {
        let key = (user.to_string(), asset.clone());
        *self.balances.entry(key).or_insert(Decimal::ZERO) += amount;
    }

    fn balance(&self, user: &str, asset: &Asset) -> Decimal {
        self.balances
            .get(&(user.to_string(), asset.clone()))
            .map(|v| *v)
            .unwrap_or(Decimal::ZERO)
    }
}
