//! Balance tracking types for the two-tier REMA model.
//!
//! Every account has a `total_atomic` balance (all money it owns) and a
//! `reserved_atomic` slice of that total earmarked for offline spending.
//! Locking only partitions money; it never creates or destroys it.
//!
//! Amounts are integer atomic units everywhere. [`to_major_units`] is the
//! only conversion to a decimal value and exists for display.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The two balance counters of one account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BalanceEntry {
    /// Everything the account owns.
    pub total_atomic: u64,
    /// Portion of `total_atomic` locked for offline use.
    pub reserved_atomic: u64,
}

impl BalanceEntry {
    /// Create a zero balance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance with `total` and nothing reserved.
    #[must_use]
    pub fn with_total(total_atomic: u64) -> Self {
        Self {
            total_atomic,
            reserved_atomic: 0,
        }
    }

    /// Spendable online: total minus reserved.
    ///
    /// Saturates so a corrupted entry reports zero rather than wrapping.
    #[must_use]
    pub fn available(&self) -> u64 {
        self.total_atomic.saturating_sub(self.reserved_atomic)
    }

    /// `0 <= reserved <= total`. The lower bound holds by type.
    #[must_use]
    pub fn invariant_holds(&self) -> bool {
        self.reserved_atomic <= self.total_atomic
    }

    /// Whether this entry has no balance at all.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.total_atomic == 0 && self.reserved_atomic == 0
    }
}

/// Convert atomic units to major currency units for display.
///
/// `decimals` is the currency's minor-unit exponent (0 for XOF, 2 for EUR).
#[must_use]
pub fn to_major_units(amount_atomic: u64, decimals: u32) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(amount_atomic), decimals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_entry_default_is_zero() {
        let entry = BalanceEntry::default();
        assert_eq!(entry.total_atomic, 0);
        assert_eq!(entry.reserved_atomic, 0);
        assert!(entry.is_zero());
        assert!(entry.invariant_holds());
    }

    #[test]
    fn available_is_total_minus_reserved() {
        let entry = BalanceEntry {
            total_atomic: 50_000,
            reserved_atomic: 20_000,
        };
        assert_eq!(entry.available(), 30_000);
        assert!(entry.invariant_holds());
    }

    #[test]
    fn broken_invariant_detected() {
        let entry = BalanceEntry {
            total_atomic: 10,
            reserved_atomic: 11,
        };
        assert!(!entry.invariant_holds());
        assert_eq!(entry.available(), 0);
    }

    #[test]
    fn major_units_conversion() {
        assert_eq!(to_major_units(5_000, 0), Decimal::new(5_000, 0));
        assert_eq!(to_major_units(12_345, 2), Decimal::new(12_345, 2));
        assert_eq!(to_major_units(12_345, 2).to_string(), "123.45");
    }
}
