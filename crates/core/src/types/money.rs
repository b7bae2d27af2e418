//! Money arithmetic helpers.
//!
//! All monetary amounts are `rust_decimal::Decimal` values in the store
//! currency. Rounding happens exactly once per computed field (items, tax,
//! shipping, total), never on intermediate sums, so totals are deterministic
//! and reproducible.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round a monetary amount to two decimal places.
///
/// Symmetric rounding: midpoints move away from zero, so `0.125` becomes
/// `0.13` and `-0.125` becomes `-0.13`.
#[must_use]
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    #[test]
    fn test_round2_midpoint_away_from_zero() {
        assert_eq!(round2(dec!(0.125)), dec!(0.13));
        assert_eq!(round2(dec!(-0.125)), dec!(-0.13));
        assert_eq!(round2(dec!(2.345)), dec!(2.35));
    }

    #[test]
    fn test_round2_noop_on_two_places() {
        assert_eq!(round2(dec!(230.00)), dec!(230.00));
        assert_eq!(round2(dec!(19.99)), dec!(19.99));
    }

    #[test]
    fn test_round2_truncates_extra_precision() {
        assert_eq!(round2(dec!(30.0000)), dec!(30.00));
        assert_eq!(round2(dec!(1.004999)), dec!(1.00));
    }
}
