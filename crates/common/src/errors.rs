//! Error Types for the Poolshare Core
//!
//! Every failure is a typed value returned to the caller. Nothing in the
//! accounting path substitutes a zero price or zero share price to keep going.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{AssetId, PoolId, UserId};

/// Result type alias for poolshare operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Main error enum shared by the ledger, oracle and accounting crates
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    // ============ Amount Errors ============
    /// Non-positive (or otherwise malformed) amount requested
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: AmountErrorReason },

    // ============ Position Errors ============
    /// Withdrawal attempted with no open position in the pool
    #[error("user {user_id} has no active position in pool {pool_id}")]
    NoActivePosition { pool_id: PoolId, user_id: UserId },

    /// Withdrawal exceeds the position's current claim
    #[error("insufficient shares: requested {requested}, available {available}")]
    InsufficientShares { requested: Decimal, available: Decimal },

    // ============ Pool Errors ============
    /// Share price is undefined because the pool has zero shares
    #[error("pool {pool_id} is empty, share price undefined")]
    EmptyPool { pool_id: PoolId },

    /// Main-asset reserve cannot cover the withdrawal
    #[error("insufficient liquidity: requested {requested}, reserve {available}")]
    InsufficientLiquidity { requested: Decimal, available: Decimal },

    /// Pool not registered
    #[error("pool {pool_id} not found")]
    PoolNotFound { pool_id: PoolId },

    /// Pool already registered
    #[error("pool {pool_id} already exists")]
    PoolAlreadyExists { pool_id: PoolId },

    /// A revaluation would drive an asset quantity negative
    #[error("composition underflow for {asset_id}: held {held}, delta {delta}")]
    CompositionUnderflow { asset_id: AssetId, held: Decimal, delta: Decimal },

    // ============ Concurrency Errors ============
    /// Per-pool lock could not be acquired within the timeout
    #[error("pool {pool_id} busy after waiting {waited_ms}ms")]
    PoolBusy { pool_id: PoolId, waited_ms: u64 },

    // ============ Oracle Errors ============
    /// Oracle cannot price a held asset
    #[error("price unavailable for {asset_id}: {reason}")]
    PriceUnavailable { asset_id: AssetId, reason: PriceUnavailableReason },

    /// Price update moved further than the allowed deviation
    #[error("price deviation for {asset_id}: {old_price} -> {new_price} exceeds {max_deviation_bps}bps")]
    PriceDeviation {
        asset_id: AssetId,
        old_price: Decimal,
        new_price: Decimal,
        max_deviation_bps: u64,
    },

    // ============ Ledger Errors ============
    /// Ledger entry failed validation
    #[error("invalid ledger entry: {reason}")]
    InvalidEntry { reason: &'static str },

    // ============ Math Errors ============
    /// Arithmetic overflow occurred
    #[error("arithmetic overflow")]
    Overflow,

    /// Division by zero
    #[error("division by zero")]
    DivisionByZero,

    // ============ Storage Errors ============
    /// Persistence layer failure
    #[error("storage error: {0}")]
    Storage(String),
}

/// Reasons for amount-related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountErrorReason {
    /// Amount is negative
    Negative,
    /// Amount is zero when non-zero required
    Zero,
    /// Amount exceeds maximum representable
    TooLarge,
    /// Amount rounds to zero shares at share precision
    TooSmall,
}

impl core::fmt::Display for AmountErrorReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Negative => "negative",
            Self::Zero => "zero",
            Self::TooLarge => "too large",
            Self::TooSmall => "below share precision",
        };
        f.write_str(s)
    }
}

/// Why the oracle refused to price an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceUnavailableReason {
    /// Asset was never listed or has been delisted
    Unknown,
    /// Last update is older than the configured maximum age
    Stale,
}

impl core::fmt::Display for PriceUnavailableReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown asset"),
            Self::Stale => f.write_str("stale price"),
        }
    }
}

impl PoolError {
    /// Returns a stable error code for logging and UI mapping
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "E010_INVALID_AMOUNT",
            Self::NoActivePosition { .. } => "E020_NO_ACTIVE_POSITION",
            Self::InsufficientShares { .. } => "E021_INSUFFICIENT_SHARES",
            Self::EmptyPool { .. } => "E030_EMPTY_POOL",
            Self::InsufficientLiquidity { .. } => "E031_INSUFFICIENT_LIQUIDITY",
            Self::PoolNotFound { .. } => "E032_POOL_NOT_FOUND",
            Self::PoolAlreadyExists { .. } => "E033_POOL_EXISTS",
            Self::CompositionUnderflow { .. } => "E034_COMPOSITION_UNDERFLOW",
            Self::PoolBusy { .. } => "E040_POOL_BUSY",
            Self::PriceUnavailable { .. } => "E050_PRICE_UNAVAILABLE",
            Self::PriceDeviation { .. } => "E051_PRICE_DEVIATION",
            Self::InvalidEntry { .. } => "E060_INVALID_ENTRY",
            Self::Overflow => "E080_OVERFLOW",
            Self::DivisionByZero => "E082_DIV_ZERO",
            Self::Storage(_) => "E090_STORAGE",
        }
    }

    /// Returns true if the caller may retry the same request once upstream
    /// conditions change. Permanent failures must be surfaced to the user.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmptyPool { .. }
                | Self::PriceUnavailable { .. }
                | Self::PoolBusy { .. }
                | Self::InsufficientLiquidity { .. }
                | Self::Storage(_)
        )
    }

    /// Shorthand for the common non-positive amount rejection
    pub fn non_positive(amount: Decimal) -> Self {
        let reason = if amount.is_sign_negative() && !amount.is_zero() {
            AmountErrorReason::Negative
        } else {
            AmountErrorReason::Zero
        };
        Self::InvalidAmount { amount, reason }
    }
}
