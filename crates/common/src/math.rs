//! Decimal Math for Share Accounting
//!
//! Checked decimal operations and the share/value conversions every caller
//! must go through. Share math lives here and nowhere else.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::constants::precision::{BPS_DENOMINATOR, PERCENT, SHARE_DECIMALS};
use crate::errors::{PoolError, PoolResult};

/// Checked addition
pub fn checked_add(a: Decimal, b: Decimal) -> PoolResult<Decimal> {
    a.checked_add(b).ok_or(PoolError::Overflow)
}

/// Checked subtraction
pub fn checked_sub(a: Decimal, b: Decimal) -> PoolResult<Decimal> {
    a.checked_sub(b).ok_or(PoolError::Overflow)
}

/// Checked multiplication
pub fn checked_mul(a: Decimal, b: Decimal) -> PoolResult<Decimal> {
    a.checked_mul(b).ok_or(PoolError::Overflow)
}

/// Checked division; a zero divisor is an explicit error, never a panic
pub fn checked_div(a: Decimal, b: Decimal) -> PoolResult<Decimal> {
    if b.is_zero() {
        return Err(PoolError::DivisionByZero);
    }
    a.checked_div(b).ok_or(PoolError::Overflow)
}

/// `a * b / c`, multiplying first for precision and falling back to
/// dividing first when the intermediate product overflows.
pub fn mul_div(a: Decimal, b: Decimal, c: Decimal) -> PoolResult<Decimal> {
    if c.is_zero() {
        return Err(PoolError::DivisionByZero);
    }
    match a.checked_mul(b) {
        Some(product) => checked_div(product, c),
        None => checked_mul(checked_div(a, c)?, b),
    }
}

/// Share price = pool value / total shares
pub fn share_price(pool_value: Decimal, total_shares: Decimal) -> PoolResult<Decimal> {
    checked_div(pool_value, total_shares)
}

/// Shares issued for depositing `amount` into a pool worth `pool_value`
/// with `total_shares` outstanding. Rounded down to share precision so
/// rounding never dilutes existing holders.
pub fn shares_for_deposit(
    amount: Decimal,
    total_shares: Decimal,
    pool_value: Decimal,
) -> PoolResult<Decimal> {
    let shares = mul_div(amount, total_shares, pool_value)?;
    Ok(shares.round_dp_with_strategy(SHARE_DECIMALS, RoundingStrategy::ToZero))
}

/// Shares burned to withdraw `amount`. Rounded up to share precision so a
/// withdrawal never takes more value than it pays for.
pub fn shares_for_withdrawal(
    amount: Decimal,
    total_shares: Decimal,
    pool_value: Decimal,
) -> PoolResult<Decimal> {
    let shares = mul_div(amount, total_shares, pool_value)?;
    Ok(shares.round_dp_with_strategy(SHARE_DECIMALS, RoundingStrategy::AwayFromZero))
}

/// Value of `shares` in a pool worth `pool_value` with `total_shares` outstanding
pub fn value_of_shares(
    shares: Decimal,
    total_shares: Decimal,
    pool_value: Decimal,
) -> PoolResult<Decimal> {
    mul_div(shares, pool_value, total_shares)
}

/// Ownership percentage (100 = 100%)
pub fn ownership_percentage(shares: Decimal, total_shares: Decimal) -> PoolResult<Decimal> {
    mul_div(shares, PERCENT, total_shares)
}

/// `|a - b| <= epsilon`
pub fn within_epsilon(a: Decimal, b: Decimal, epsilon: Decimal) -> bool {
    match a.checked_sub(b) {
        Some(diff) => diff.abs() <= epsilon,
        None => false,
    }
}

/// Price deviation between two prices in basis points
///
/// 100 bps = 1%, 10000 bps = 100%. Saturates at `u64::MAX`.
pub fn price_deviation_bps(old_price: Decimal, new_price: Decimal) -> u64 {
    if old_price.is_zero() {
        return BPS_DENOMINATOR; // 100% if no previous price
    }

    let diff = (new_price - old_price).abs();
    let bps = mul_div(diff, Decimal::from(BPS_DENOMINATOR), old_price.abs())
        .unwrap_or(Decimal::MAX)
        .trunc();

    bps.to_u64().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_checked_div_by_zero() {
        assert_eq!(checked_div(dec!(1), Decimal::ZERO), Err(PoolError::DivisionByZero));
    }

    #[test]
    fn test_mul_div_falls_back_on_overflow() {
        let big = Decimal::MAX / dec!(2);
        let result = mul_div(big, dec!(4), dec!(8)).unwrap();
        assert!(result > big / dec!(3));
    }

    #[test]
    fn test_shares_for_deposit_one_to_one() {
        let shares = shares_for_deposit(dec!(50), dec!(100), dec!(100)).unwrap();
        assert_eq!(shares, dec!(50));
    }

    #[test]
    fn test_shares_for_deposit_after_gain() {
        // 110 value, 100 shares: price 1.1
        let shares = shares_for_deposit(dec!(11), dec!(100), dec!(110)).unwrap();
        assert_eq!(shares, dec!(10));
    }

    #[test]
    fn test_rounding_directions() {
        // 1 / 3 shares
        let down = shares_for_deposit(dec!(1), dec!(1), dec!(3)).unwrap();
        let up = shares_for_withdrawal(dec!(1), dec!(1), dec!(3)).unwrap();
        assert!(down < up);
        assert_eq!(up - down, dec!(0.000000000000000001));
    }

    #[test]
    fn test_ownership_percentage() {
        let pct = ownership_percentage(dec!(100), dec!(150)).unwrap();
        assert_eq!(pct.round_dp(2), dec!(66.67));
        let pct = ownership_percentage(dec!(50), dec!(150)).unwrap();
        assert_eq!(pct.round_dp(2), dec!(33.33));
    }

    #[test]
    fn test_ownership_empty_pool() {
        assert_eq!(
            ownership_percentage(dec!(0), dec!(0)),
            Err(PoolError::DivisionByZero)
        );
    }

    #[test]
    fn test_price_deviation_calculation() {
        assert_eq!(price_deviation_bps(dec!(100000), dec!(100000)), 0);
        assert_eq!(price_deviation_bps(dec!(100000), dec!(101000)), 100);
        assert_eq!(price_deviation_bps(dec!(100000), dec!(95000)), 500);
        assert_eq!(price_deviation_bps(Decimal::ZERO, dec!(1)), 10_000);
    }

    #[test]
    fn test_within_epsilon() {
        assert!(within_epsilon(dec!(1.0000000000001), dec!(1), dec!(0.000000000001)));
        assert!(!within_epsilon(dec!(1.00001), dec!(1), dec!(0.000000000001)));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Issuing then valuing shares never creates value
            #[test]
            fn prop_deposit_value_not_inflated(
                amount in 1u64..1_000_000_000,
                total in 1u64..1_000_000_000,
                value in 1u64..1_000_000_000,
            ) {
                let amount = Decimal::from(amount);
                let total = Decimal::from(total);
                let value = Decimal::from(value);

                let shares = shares_for_deposit(amount, total, value).unwrap();
                let new_total = total + shares;
                let new_value = value + amount;
                let worth = value_of_shares(shares, new_total, new_value).unwrap();

                prop_assert!(worth <= amount + dec!(0.000000001));
            }

            /// Withdrawal rounding always burns at least the exact share count
            #[test]
            fn prop_withdrawal_rounds_up(
                amount in 1u64..1_000_000,
                total in 1u64..1_000_000_000,
                value in 1u64..1_000_000_000,
            ) {
                let amount = Decimal::from(amount);
                let total = Decimal::from(total);
                let value = Decimal::from(value);

                let burn = shares_for_withdrawal(amount, total, value).unwrap();
                let issue = shares_for_deposit(amount, total, value).unwrap();
                prop_assert!(burn >= issue);
            }
        }
    }
}
