//! Pool Account
//!
//! Valuation of a pool's composition and the share price derived from it.
//!
//! Value is denominated in the pool's main asset: every held asset is
//! converted through the oracle as `quantity * price(asset) / price(main)`,
//! and the main asset itself counts one for one. A pool holding an asset the
//! oracle cannot price has no value at all; the asset is never skipped.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use poolshare_common::{
    check,
    errors::{AmountErrorReason, PoolError, PoolResult},
    math, AssetId, Pool, PoolId, PoolKind, Settlement,
};
use poolshare_price_oracle::PriceOracle;

// ============ Share Price ============

/// Share price, undefined while the pool has no shares outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "price")]
pub enum SharePrice {
    /// Empty pool; the next deposit bootstraps at 1:1
    Undefined,
    /// Main-asset value of one share
    Priced(Decimal),
}

impl SharePrice {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Price if defined
    pub fn priced(self) -> Option<Decimal> {
        match self {
            Self::Undefined => None,
            Self::Priced(price) => Some(price),
        }
    }

    /// Price, or `EmptyPool` for an undefined price
    pub fn require(self, pool_id: &PoolId) -> PoolResult<Decimal> {
        self.priced().ok_or_else(|| PoolError::EmptyPool {
            pool_id: pool_id.clone(),
        })
    }
}

// ============ Valuation ============

/// Value of `quantity` of `asset_id` in units of the pool's main asset
pub fn value_in_main<O: PriceOracle + ?Sized>(
    pool: &Pool,
    asset_id: &AssetId,
    quantity: Decimal,
    oracle: &O,
) -> PoolResult<Decimal> {
    if *asset_id == pool.main_asset_id {
        return Ok(quantity);
    }
    let asset_price = oracle.price_of(asset_id)?;
    let main_price = oracle.price_of(&pool.main_asset_id)?;
    math::mul_div(quantity, asset_price, main_price)
}

/// Total pool value in main-asset units.
///
/// # Errors
/// - `PriceUnavailable` if any held asset (or the main asset, when other
///   assets are held) cannot be priced
pub fn current_value<O: PriceOracle + ?Sized>(pool: &Pool, oracle: &O) -> PoolResult<Decimal> {
    pool.asset_composition
        .iter()
        .try_fold(Decimal::ZERO, |total, (asset_id, quantity)| {
            math::checked_add(total, value_in_main(pool, asset_id, *quantity, oracle)?)
        })
}

/// Total pool value in the oracle's quote currency
pub fn current_value_in_quote<O: PriceOracle + ?Sized>(pool: &Pool, oracle: &O) -> PoolResult<Decimal> {
    pool.asset_composition
        .iter()
        .try_fold(Decimal::ZERO, |total, (asset_id, quantity)| {
            let value = math::checked_mul(*quantity, oracle.price_of(asset_id)?)?;
            math::checked_add(total, value)
        })
}

/// `current_value / total_shares`, or `Undefined` for an empty pool
pub fn share_price<O: PriceOracle + ?Sized>(pool: &Pool, oracle: &O) -> PoolResult<SharePrice> {
    if pool.is_empty() {
        return Ok(SharePrice::Undefined);
    }
    let value = current_value(pool, oracle)?;
    Ok(SharePrice::Priced(math::share_price(value, pool.total_shares)?))
}

// ============ Revaluation ============

/// Adjust one holding for settlement activity outside this core.
///
/// Moves the share price for every holder without changing `total_shares`.
pub fn apply_external_revaluation(pool: &mut Pool, asset_id: &AssetId, delta: Decimal) -> PoolResult<()> {
    check!(!pool.is_empty(), PoolError::EmptyPool { pool_id: pool.id.clone() });
    check!(
        !delta.is_zero(),
        PoolError::InvalidAmount { amount: delta, reason: AmountErrorReason::Zero }
    );
    pool.apply_delta(asset_id, delta)
}

/// Apply every leg of a settlement, or none of them.
///
/// # Errors
/// - `EmptyPool` if the pool has no shares outstanding
/// - `InvalidAmount` for an empty settlement or a zero leg
/// - `CompositionUnderflow` if any leg would drive a holding negative
pub fn apply_settlement(pool: &mut Pool, settlement: &Settlement) -> PoolResult<()> {
    check!(
        !settlement.legs.is_empty(),
        PoolError::InvalidAmount { amount: Decimal::ZERO, reason: AmountErrorReason::Zero }
    );
    let mut updated = pool.clone();
    for leg in &settlement.legs {
        apply_external_revaluation(&mut updated, &leg.asset_id, leg.delta)?;
    }
    *pool = updated;
    Ok(())
}

// ============ Pool Stats ============

/// One holding with its main-asset value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetValuation {
    pub asset_id: AssetId,
    pub quantity: Decimal,
    /// Value in main-asset units
    pub value: Decimal,
    /// Share of pool value (100 = 100%)
    pub weight_pct: Decimal,
}

/// Read-only summary of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub pool_id: PoolId,
    pub kind: PoolKind,
    pub main_asset_id: AssetId,
    pub total_shares: Decimal,
    /// Value in main-asset units
    pub value: Decimal,
    /// Value in quote currency; `None` when the main asset has no quote price
    pub value_in_quote: Option<Decimal>,
    pub share_price: SharePrice,
    /// Main asset available to pay withdrawals
    pub liquid_reserve: Decimal,
    /// `liquid_reserve / value * 100`; `None` for a worthless pool
    pub reserve_ratio_pct: Option<Decimal>,
    pub active_positions: usize,
    pub composition: Vec<AssetValuation>,
}

/// Build stats for a pool with `active_positions` open positions
pub fn pool_stats<O: PriceOracle + ?Sized>(
    pool: &Pool,
    active_positions: usize,
    oracle: &O,
) -> PoolResult<PoolStats> {
    let mut composition = Vec::with_capacity(pool.asset_composition.len());
    let mut value = Decimal::ZERO;
    for (asset_id, quantity) in &pool.asset_composition {
        let asset_value = value_in_main(pool, asset_id, *quantity, oracle)?;
        value = math::checked_add(value, asset_value)?;
        composition.push(AssetValuation {
            asset_id: asset_id.clone(),
            quantity: *quantity,
            value: asset_value,
            weight_pct: Decimal::ZERO,
        });
    }

    if !value.is_zero() {
        for holding in &mut composition {
            holding.weight_pct = math::ownership_percentage(holding.value, value)?;
        }
    }

    let share_price = if pool.is_empty() {
        SharePrice::Undefined
    } else {
        SharePrice::Priced(math::share_price(value, pool.total_shares)?)
    };

    let liquid_reserve = pool.liquid_reserve();
    let reserve_ratio_pct = if value.is_zero() {
        None
    } else {
        Some(math::ownership_percentage(liquid_reserve, value)?)
    };

    // An unlisted or stale asset leaves the quote value unknown; any other
    // failure is an error of the stats themselves
    let value_in_quote = match current_value_in_quote(pool, oracle) {
        Ok(quote) => Some(quote),
        Err(PoolError::PriceUnavailable { .. }) => None,
        Err(e) => return Err(e),
    };

    Ok(PoolStats {
        pool_id: pool.id.clone(),
        kind: pool.kind.clone(),
        main_asset_id: pool.main_asset_id.clone(),
        total_shares: pool.total_shares,
        value,
        value_in_quote,
        share_price,
        liquid_reserve,
        reserve_ratio_pct,
        active_positions,
        composition,
    })
}
