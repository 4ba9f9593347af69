//! Core Constants
//!
//! Defaults for precision, locking and oracle freshness. Runtime
//! configuration structs fall back to these values.

use rust_decimal::Decimal;

/// Share precision
pub mod precision {
    use super::Decimal;

    /// Decimal places share counts are quoted with (token-decimal convention)
    pub const SHARE_DECIMALS: u32 = 18;

    /// Default tolerance for share comparisons (1e-12 shares)
    pub const DEFAULT_SHARE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 12);

    /// Percentage precision (100 = 100%)
    pub const PERCENT: Decimal = Decimal::ONE_HUNDRED;

    /// Basis points denominator
    pub const BPS_DENOMINATOR: u64 = 10_000;
}

/// Per-pool locking
pub mod locking {
    /// Default time to wait for a pool lock before failing with `PoolBusy`
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 3_000;
}

/// Oracle Configuration
pub mod oracle {
    /// Maximum price age before it is considered stale (1 hour)
    pub const DEFAULT_MAX_PRICE_AGE_MS: u64 = 60 * 60 * 1_000;

    /// Maximum allowed price move per update (50%); 0 disables the check
    pub const DEFAULT_MAX_PRICE_DEVIATION_BPS: u64 = 5_000;
}
