//! Money conservation checker.
//!
//! Offline payments only move money between accounts. The only way money
//! enters the ledger is a grant (onboarding, online top-up), and nothing
//! leaves it, so per currency:
//!
//! ```text
//! Σ total_atomic == Σ grants
//! ```
//!
//! Reserve locks and releases shift money between the two tiers of one
//! account and never change the sum.

use std::collections::BTreeMap;

use rema_types::{RemaError, Result};

/// Per-currency grant totals since genesis.
#[derive(Debug, Default)]
pub struct SupplyConservation {
    granted: BTreeMap<u16, u128>,
}

impl SupplyConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_grant(&mut self, currency_code: u16, amount: u64) {
        *self.granted.entry(currency_code).or_insert(0) += u128::from(amount);
    }

    /// Expected money on the ledger for `currency_code`.
    #[must_use]
    pub fn expected_supply(&self, currency_code: u16) -> u128 {
        self.granted.get(&currency_code).copied().unwrap_or(0)
    }

    /// # Errors
    /// Returns [`RemaError::ConservationViolation`] if `actual` differs from
    /// the granted total.
    pub fn verify(&self, currency_code: u16, actual: u128) -> Result<()> {
        let expected = self.expected_supply(currency_code);
        if actual != expected {
            return Err(RemaError::ConservationViolation {
                reason: format!(
                    "currency {currency_code}: ledger holds {actual}, grants total {expected}"
                ),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn tracked_currencies(&self) -> Vec<u16> {
        self.granted.keys().copied().collect()
    }
}
