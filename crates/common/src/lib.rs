//! Poolshare Common Library
//!
//! Shared types, constants, and utilities for the pool-share accounting core.
//!
//! ## Model
//!
//! Users deposit a pool's main asset and receive **shares**, a proportional
//! claim on everything the pool holds. The pool's composition can change
//! through settlement (for example buying a discounted asset with part of its
//! reserve), which moves the share price for every holder without touching
//! anyone's share count.
//!
//! - **Pool**: total shares and asset composition
//! - **StakingPosition**: one user's share count in one pool
//! - **LedgerEntry**: append-only record of every movement
//!
//! All quantities are `rust_decimal::Decimal`; binary floating point is never
//! used for value or share arithmetic.

pub mod clock;
pub mod constants;
pub mod errors;
pub mod math;
pub mod types;
pub mod validation;

// Re-exports for convenience
pub use clock::*;
pub use errors::*;
pub use types::*;
