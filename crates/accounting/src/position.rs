//! Position-level valuation.

use rust_decimal::Decimal;

use poolshare_common::{
    errors::{PoolError, PoolResult},
    math, Pool, StakingPosition,
};
use poolshare_price_oracle::PriceOracle;

use crate::pool_account;

/// Main-asset value of a position: `shares * share_price`.
///
/// # Errors
/// - `EmptyPool` if the position holds shares in a pool with none outstanding
/// - `PriceUnavailable` if the pool cannot be valued
pub fn value_of<O: PriceOracle + ?Sized>(
    position: &StakingPosition,
    pool: &Pool,
    oracle: &O,
) -> PoolResult<Decimal> {
    if position.shares.is_zero() {
        return Ok(Decimal::ZERO);
    }
    if pool.is_empty() {
        return Err(PoolError::EmptyPool { pool_id: pool.id.clone() });
    }
    let value = pool_account::current_value(pool, oracle)?;
    math::value_of_shares(position.shares, pool.total_shares, value)
}

/// `shares / total_shares * 100`
pub fn ownership_percentage(position: &StakingPosition, pool: &Pool) -> PoolResult<Decimal> {
    if pool.is_empty() {
        return Err(PoolError::EmptyPool { pool_id: pool.id.clone() });
    }
    math::ownership_percentage(position.shares, pool.total_shares)
}

/// Largest amount a withdrawal can currently pay: the position's value
/// capped by the pool's liquid reserve
pub fn max_withdrawable<O: PriceOracle + ?Sized>(
    position: &StakingPosition,
    pool: &Pool,
    oracle: &O,
) -> PoolResult<Decimal> {
    let value = value_of(position, pool, oracle)?;
    Ok(value.min(pool.liquid_reserve()))
}
