//! Validation Helpers
//!
//! Reusable guards used at the `Validated` gate of every operation.
//!
//! ```rust,ignore
//! use poolshare_common::validation::{check, require_positive};
//!
//! require_positive(amount)?;
//! check!(position.is_active(), PoolError::NoActivePosition { pool_id, user_id });
//! ```

use rust_decimal::Decimal;

use crate::errors::{PoolError, PoolResult};

/// Check a condition and return an error if it fails.
#[macro_export]
macro_rules! check {
    ($condition:expr, $error:expr) => {
        if !($condition) {
            return Err($error);
        }
    };
}

pub use check;

/// Require an amount to be strictly positive.
pub fn require_positive(amount: Decimal) -> PoolResult<()> {
    if amount <= Decimal::ZERO {
        return Err(PoolError::non_positive(amount));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn guarded(flag: bool) -> PoolResult<u8> {
        check!(flag, PoolError::Overflow);
        Ok(1)
    }

    #[test]
    fn test_check_macro() {
        assert_eq!(guarded(true), Ok(1));
        assert_eq!(guarded(false), Err(PoolError::Overflow));
    }

    #[test]
    fn test_require_positive() {
        assert!(require_positive(dec!(0.0001)).is_ok());
        assert!(require_positive(dec!(0)).is_err());
        assert!(require_positive(dec!(-5)).is_err());
    }
}
