//! Pool Accounting Orchestrator
//!
//! Entry point for deposits, withdrawals and settlement-driven revaluations.
//!
//! Every mutating request moves through four gates and either reaches
//! `recorded` or is rejected with no mutation:
//!
//! 1. **validated**: amounts, pool and position checked
//! 2. **priced**: share price and share delta computed from committed state
//! 3. **applied**: pool and position updated on private copies
//! 4. **recorded**: copies and ledger entries committed in one store call
//!
//! Mutations on one pool are serialized by a per-pool lock; different pools
//! never contend. Reads observe committed state only.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use poolshare_common::{
    check,
    errors::{AmountErrorReason, PoolError, PoolResult},
    math,
    validation::require_positive,
    AssetId, Clock, LedgerEntry, LedgerEntryKind, NewLedgerEntry, Pool, PoolId, PoolKind, PositionId,
    RevaluationReason, Settlement, StakingPosition, SystemClock, UserId,
};
use poolshare_price_oracle::PriceOracle;

use crate::config::AccountingConfig;
use crate::locks::PoolLocks;
use crate::pool_account::{self, PoolStats, SharePrice};
use crate::position;
use crate::store::{AccountingStore, Commit};

// ============ Audit Types ============

/// A position whose live share count disagrees with its ledger history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDiscrepancy {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub live_shares: Decimal,
    pub ledger_shares: Decimal,
}

/// Conservation check of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAudit {
    pub pool_id: PoolId,
    pub total_shares: Decimal,
    /// Sum of shares over active positions
    pub position_shares: Decimal,
    /// Net shares recorded in the ledger
    pub ledger_shares: Decimal,
    pub discrepancies: Vec<PositionDiscrepancy>,
}

impl PoolAudit {
    /// True if pool, positions and ledger all agree
    pub fn is_consistent(&self) -> bool {
        self.position_shares == self.total_shares
            && self.ledger_shares == self.total_shares
            && self.discrepancies.is_empty()
    }
}

enum WithdrawRequest {
    Amount(Decimal),
    All,
}

// ============ Orchestrator ============

/// Share-based accounting over a set of pools
pub struct PoolAccounting<S, O, C = SystemClock> {
    pub(crate) store: S,
    pub(crate) oracle: O,
    pub(crate) clock: C,
    pub(crate) locks: PoolLocks,
    pub(crate) config: AccountingConfig,
}

impl<S, O, C> PoolAccounting<S, O, C>
where
    S: AccountingStore,
    O: PriceOracle,
    C: Clock,
{
    pub fn new(store: S, oracle: O, clock: C, config: AccountingConfig) -> Self {
        Self {
            store,
            oracle,
            clock,
            locks: PoolLocks::new(config.lock_timeout()),
            config,
        }
    }

    pub fn config(&self) -> &AccountingConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    fn load_pool(&self, pool_id: &PoolId) -> PoolResult<Pool> {
        self.store
            .pool(pool_id)?
            .ok_or_else(|| PoolError::PoolNotFound { pool_id: pool_id.clone() })
    }

    /// Run `f` under the pool's lock. Pools present in the store but not yet
    /// registered (a restored snapshot) get their lock on first use.
    fn with_pool<T>(&self, pool_id: &PoolId, f: impl FnOnce() -> PoolResult<T>) -> PoolResult<T> {
        if !self.locks.is_registered(pool_id) {
            self.load_pool(pool_id)?;
            self.locks.register(pool_id);
        }
        self.locks.with_pool(pool_id, f)
    }

    // ============ Pool Lifecycle ============

    /// Register an empty pool.
    ///
    /// # Errors
    /// - `PoolAlreadyExists` if the id is taken
    pub fn create_pool(&self, pool_id: PoolId, kind: PoolKind, main_asset_id: AssetId) -> PoolResult<Pool> {
        let pool = Pool::new(pool_id, kind, main_asset_id, self.clock.now_ms());
        self.store.insert_pool(pool.clone())?;
        self.locks.register(&pool.id);
        info!(pool_id = %pool.id, kind = ?pool.kind, main_asset_id = %pool.main_asset_id, "pool created");
        Ok(pool)
    }

    // ============ Deposit ============

    /// Deposit `amount` of the pool's main asset and receive shares.
    ///
    /// The first deposit into an empty pool issues shares 1:1.
    ///
    /// # Errors
    /// - `InvalidAmount` if `amount` is not positive or buys no shares
    /// - `PoolNotFound`, `PriceUnavailable`, `PoolBusy`
    pub fn deposit(&self, user_id: &UserId, pool_id: &PoolId, amount: Decimal) -> PoolResult<StakingPosition> {
        require_positive(amount)?;
        self.with_pool(pool_id, || self.deposit_locked(user_id, pool_id, amount))
    }

    fn deposit_locked(&self, user_id: &UserId, pool_id: &PoolId, amount: Decimal) -> PoolResult<StakingPosition> {
        // 1. Validate
        let mut pool = self.load_pool(pool_id)?;
        let existing = self.store.active_position(pool_id, user_id)?;
        debug!(pool_id = %pool_id, user_id = %user_id, %amount, stage = "validated", "deposit");

        // 2. Price
        let (shares, share_price) = if pool.is_empty() {
            (amount, Decimal::ONE)
        } else {
            let value = pool_account::current_value(&pool, &self.oracle)?;
            check!(value > Decimal::ZERO, PoolError::DivisionByZero);
            (
                math::shares_for_deposit(amount, pool.total_shares, value)?,
                math::share_price(value, pool.total_shares)?,
            )
        };
        check!(
            shares > Decimal::ZERO,
            PoolError::InvalidAmount { amount, reason: AmountErrorReason::TooSmall }
        );
        debug!(pool_id = %pool_id, %shares, %share_price, stage = "priced", "deposit");

        // 3. Apply
        let now = pool.touch(self.clock.now_ms());
        let opened_position = existing.is_none();
        let mut position = match existing {
            Some(position) => position,
            None => StakingPosition::open(&mut pool, user_id.clone(), now),
        };
        position.credit(shares)?;
        pool.total_shares = math::checked_add(pool.total_shares, shares)?;
        let main_asset_id = pool.main_asset_id.clone();
        pool.apply_delta(&main_asset_id, amount)?;
        debug!(pool_id = %pool_id, position_id = %position.id, stage = "applied", "deposit");

        // 4. Record
        let entry = NewLedgerEntry {
            pool_id: pool_id.clone(),
            user_id: Some(user_id.clone()),
            asset_id: main_asset_id,
            kind: LedgerEntryKind::Deposit {
                position_id: position.id,
                opened_position,
            },
            asset_amount: amount,
            share_amount: shares,
            share_price_at_entry: share_price,
            timestamp: now,
        };
        let total_shares = pool.total_shares;
        self.store.commit(Commit {
            pool: Some(pool),
            positions: vec![position.clone()],
            entries: vec![entry],
        })?;
        debug!(pool_id = %pool_id, stage = "recorded", "deposit");

        info!(
            pool_id = %pool_id,
            user_id = %user_id,
            %amount,
            %shares,
            %share_price,
            %total_shares,
            opened_position,
            "deposit committed"
        );
        Ok(position)
    }

    // ============ Withdraw ============

    /// Withdraw `amount` of the main asset by burning shares at the current
    /// share price.
    ///
    /// Burns are rounded up; a remainder within epsilon of zero is burned
    /// too and the position closes.
    ///
    /// # Errors
    /// - `InvalidAmount` if `amount` is not positive
    /// - `NoActivePosition` if the user holds nothing in the pool
    /// - `EmptyPool`, `PriceUnavailable`
    /// - `InsufficientShares` if the burn exceeds the position
    /// - `InsufficientLiquidity` if the main-asset reserve cannot pay `amount`
    /// - `PoolNotFound`, `PoolBusy`
    pub fn withdraw(&self, user_id: &UserId, pool_id: &PoolId, amount: Decimal) -> PoolResult<StakingPosition> {
        require_positive(amount)?;
        self.with_pool(pool_id, || {
            self.withdraw_locked(user_id, pool_id, WithdrawRequest::Amount(amount))
        })
    }

    /// Withdraw as much as the position can currently take: its full value,
    /// capped by the pool's liquid reserve.
    pub fn withdraw_all(&self, user_id: &UserId, pool_id: &PoolId) -> PoolResult<StakingPosition> {
        self.with_pool(pool_id, || self.withdraw_locked(user_id, pool_id, WithdrawRequest::All))
    }

    fn withdraw_locked(
        &self,
        user_id: &UserId,
        pool_id: &PoolId,
        request: WithdrawRequest,
    ) -> PoolResult<StakingPosition> {
        // 1. Validate
        let mut pool = self.load_pool(pool_id)?;
        let mut position = self
            .store
            .active_position(pool_id, user_id)?
            .filter(StakingPosition::is_active)
            .ok_or_else(|| PoolError::NoActivePosition {
                pool_id: pool_id.clone(),
                user_id: user_id.clone(),
            })?;
        check!(!pool.is_empty(), PoolError::EmptyPool { pool_id: pool_id.clone() });
        debug!(pool_id = %pool_id, user_id = %user_id, stage = "validated", "withdraw");

        // 2. Price
        let value = pool_account::current_value(&pool, &self.oracle)?;
        check!(value > Decimal::ZERO, PoolError::DivisionByZero);
        let share_price = math::share_price(value, pool.total_shares)?;
        let reserve = pool.liquid_reserve();
        let amount = match request {
            WithdrawRequest::Amount(amount) => amount,
            WithdrawRequest::All => {
                let full = math::value_of_shares(position.shares, pool.total_shares, value)?;
                let capped = full.min(reserve);
                check!(
                    capped > Decimal::ZERO,
                    PoolError::InsufficientLiquidity { requested: full, available: reserve }
                );
                capped
            }
        };
        let mut burn = math::shares_for_withdrawal(amount, pool.total_shares, value)?;

        // 3. Validate sufficiency
        let epsilon = self.config.share_epsilon;
        check!(
            burn <= math::checked_add(position.shares, epsilon)?,
            PoolError::InsufficientShares { requested: burn, available: position.shares }
        );
        check!(
            amount <= reserve,
            PoolError::InsufficientLiquidity { requested: amount, available: reserve }
        );
        if math::within_epsilon(position.shares, burn, epsilon) {
            burn = position.shares;
        }
        debug!(pool_id = %pool_id, %amount, %burn, %share_price, stage = "priced", "withdraw");

        // 4. Apply
        let now = pool.touch(self.clock.now_ms());
        position.debit(burn, now)?;
        pool.total_shares = math::checked_sub(pool.total_shares, burn)?;
        let main_asset_id = pool.main_asset_id.clone();
        pool.apply_delta(&main_asset_id, -amount)?;
        // Holdings left behind once the last share is burned are written off
        let written_off: Vec<(AssetId, Decimal)> = if pool.is_empty() {
            std::mem::take(&mut pool.asset_composition).into_iter().collect()
        } else {
            Vec::new()
        };
        let closed_position = !position.is_active();
        debug!(pool_id = %pool_id, position_id = %position.id, closed_position, stage = "applied", "withdraw");

        // 5. Record
        let mut entries = Vec::with_capacity(1 + written_off.len());
        entries.push(NewLedgerEntry {
            pool_id: pool_id.clone(),
            user_id: Some(user_id.clone()),
            asset_id: main_asset_id,
            kind: LedgerEntryKind::Withdraw {
                position_id: position.id,
                closed_position,
            },
            asset_amount: amount,
            share_amount: -burn,
            share_price_at_entry: share_price,
            timestamp: now,
        });
        entries.extend(written_off.iter().map(|(asset_id, held)| NewLedgerEntry {
            pool_id: pool_id.clone(),
            user_id: None,
            asset_id: asset_id.clone(),
            kind: LedgerEntryKind::ExternalRevaluation { reason: RevaluationReason::Adjustment },
            asset_amount: -*held,
            share_amount: Decimal::ZERO,
            share_price_at_entry: Decimal::ZERO,
            timestamp: now,
        }));
        let total_shares = pool.total_shares;
        self.store.commit(Commit {
            pool: Some(pool),
            positions: vec![position.clone()],
            entries,
        })?;
        debug!(pool_id = %pool_id, stage = "recorded", "withdraw");
        for (asset_id, held) in &written_off {
            warn!(pool_id = %pool_id, asset_id = %asset_id, %held, "residual holding written off on empty pool");
        }

        info!(
            pool_id = %pool_id,
            user_id = %user_id,
            %amount,
            shares = %burn,
            %share_price,
            %total_shares,
            "withdrawal committed"
        );
        if closed_position {
            info!(pool_id = %pool_id, user_id = %user_id, position_id = %position.id, "position closed");
        }
        Ok(position)
    }

    // ============ Revaluation ============

    /// Adjust one holding for settlement activity outside this core.
    /// Returns the share price after the change.
    pub fn apply_external_revaluation(
        &self,
        pool_id: &PoolId,
        asset_id: AssetId,
        delta: Decimal,
        reason: RevaluationReason,
    ) -> PoolResult<Decimal> {
        self.apply_settlement(pool_id, Settlement::revaluation(asset_id, delta, reason))
    }

    /// Apply every leg of a settlement as one serialized revaluation, one
    /// ledger entry per leg. Returns the share price after the change.
    ///
    /// # Errors
    /// - `InvalidAmount` for an empty settlement or a zero leg
    /// - `EmptyPool` if the pool has no shares outstanding
    /// - `CompositionUnderflow` if a leg would drive a holding negative
    /// - `PriceUnavailable` if the revalued pool cannot be priced
    /// - `PoolNotFound`, `PoolBusy`
    pub fn apply_settlement(&self, pool_id: &PoolId, settlement: Settlement) -> PoolResult<Decimal> {
        for leg in &settlement.legs {
            check!(
                !leg.delta.is_zero(),
                PoolError::InvalidAmount { amount: leg.delta, reason: AmountErrorReason::Zero }
            );
        }
        self.with_pool(pool_id, || self.settle_locked(pool_id, settlement))
    }

    fn settle_locked(&self, pool_id: &PoolId, settlement: Settlement) -> PoolResult<Decimal> {
        // 1. Validate and apply on a copy
        let mut pool = self.load_pool(pool_id)?;
        pool_account::apply_settlement(&mut pool, &settlement)?;
        debug!(pool_id = %pool_id, legs = settlement.legs.len(), stage = "validated", "settlement");

        // 2. Price the result; an unpriceable pool refuses the settlement
        let share_price = pool_account::share_price(&pool, &self.oracle)?.require(pool_id)?;
        debug!(pool_id = %pool_id, %share_price, stage = "priced", "settlement");

        // 3. Apply
        let now = pool.touch(self.clock.now_ms());
        let entries = settlement
            .legs
            .into_iter()
            .map(|leg| NewLedgerEntry {
                pool_id: pool_id.clone(),
                user_id: None,
                asset_id: leg.asset_id,
                kind: LedgerEntryKind::ExternalRevaluation { reason: leg.reason },
                asset_amount: leg.delta,
                share_amount: Decimal::ZERO,
                share_price_at_entry: share_price,
                timestamp: now,
            })
            .collect::<Vec<_>>();
        debug!(pool_id = %pool_id, stage = "applied", "settlement");

        // 4. Record
        let legs = entries.len();
        self.store.commit(Commit {
            pool: Some(pool),
            positions: Vec::new(),
            entries,
        })?;
        debug!(pool_id = %pool_id, stage = "recorded", "settlement");

        info!(pool_id = %pool_id, legs, %share_price, "settlement applied");
        Ok(share_price)
    }

    // ============ Queries ============

    /// Committed pool state
    pub fn pool(&self, pool_id: &PoolId) -> PoolResult<Pool> {
        self.load_pool(pool_id)
    }

    /// Current share price, `Undefined` for an empty pool
    pub fn share_price(&self, pool_id: &PoolId) -> PoolResult<SharePrice> {
        pool_account::share_price(&self.load_pool(pool_id)?, &self.oracle)
    }

    /// Pool value in main-asset units
    pub fn current_value(&self, pool_id: &PoolId) -> PoolResult<Decimal> {
        pool_account::current_value(&self.load_pool(pool_id)?, &self.oracle)
    }

    /// Pool value in the oracle's quote currency
    pub fn current_value_in_quote(&self, pool_id: &PoolId) -> PoolResult<Decimal> {
        pool_account::current_value_in_quote(&self.load_pool(pool_id)?, &self.oracle)
    }

    /// Main asset available to pay withdrawals
    pub fn liquid_reserve(&self, pool_id: &PoolId) -> PoolResult<Decimal> {
        Ok(self.load_pool(pool_id)?.liquid_reserve())
    }

    /// The user's active position in a pool, if any
    pub fn position(&self, user_id: &UserId, pool_id: &PoolId) -> PoolResult<Option<StakingPosition>> {
        self.load_pool(pool_id)?;
        self.store.active_position(pool_id, user_id)
    }

    /// The user's active positions across all pools
    pub fn positions_for(&self, user_id: &UserId) -> PoolResult<Vec<StakingPosition>> {
        self.store.positions_for_user(user_id)
    }

    /// Pool and position from the same committed state
    fn require_position(&self, user_id: &UserId, pool_id: &PoolId) -> PoolResult<(Pool, StakingPosition)> {
        let (pool, position) = self
            .store
            .pool_with_position(pool_id, user_id)?
            .ok_or_else(|| PoolError::PoolNotFound { pool_id: pool_id.clone() })?;
        let position = position.ok_or_else(|| PoolError::NoActivePosition {
            pool_id: pool_id.clone(),
            user_id: user_id.clone(),
        })?;
        Ok((pool, position))
    }

    /// Main-asset value of the user's position
    pub fn value_of(&self, user_id: &UserId, pool_id: &PoolId) -> PoolResult<Decimal> {
        let (pool, position) = self.require_position(user_id, pool_id)?;
        position::value_of(&position, &pool, &self.oracle)
    }

    /// The user's share of the pool (100 = 100%)
    pub fn ownership_percentage(&self, user_id: &UserId, pool_id: &PoolId) -> PoolResult<Decimal> {
        let (pool, position) = self.require_position(user_id, pool_id)?;
        position::ownership_percentage(&position, &pool)
    }

    /// Largest amount the user can withdraw right now
    pub fn max_withdrawable(&self, user_id: &UserId, pool_id: &PoolId) -> PoolResult<Decimal> {
        let (pool, position) = self.require_position(user_id, pool_id)?;
        position::max_withdrawable(&position, &pool, &self.oracle)
    }

    /// Summary of a pool for display
    pub fn pool_stats(&self, pool_id: &PoolId) -> PoolResult<PoolStats> {
        let (pool, positions) = self
            .store
            .pool_with_positions(pool_id)?
            .ok_or_else(|| PoolError::PoolNotFound { pool_id: pool_id.clone() })?;
        pool_account::pool_stats(&pool, positions.len(), &self.oracle)
    }

    /// Ledger history of a pool, optionally one user's, ascending by time
    pub fn history(&self, pool_id: &PoolId, user_id: Option<&UserId>) -> PoolResult<Vec<LedgerEntry>> {
        self.load_pool(pool_id)?;
        self.store.ledger_entries(pool_id, user_id)
    }

    // ============ Audit ============

    /// Check share conservation between pool, positions and ledger.
    ///
    /// Runs under the pool lock so it sees a single committed state.
    pub fn audit_pool(&self, pool_id: &PoolId) -> PoolResult<PoolAudit> {
        self.with_pool(pool_id, || {
            let (pool, positions) = self
                .store
                .pool_with_positions(pool_id)?
                .ok_or_else(|| PoolError::PoolNotFound { pool_id: pool_id.clone() })?;

            let position_shares = positions
                .iter()
                .try_fold(Decimal::ZERO, |acc, p| math::checked_add(acc, p.shares))?;
            let ledger_shares = self.store.ledger_shares(pool_id, None)?;

            let mut discrepancies = Vec::new();
            for position in &positions {
                let recorded = self.store.ledger_position_shares(pool_id, &position.id)?;
                if recorded != position.shares {
                    discrepancies.push(PositionDiscrepancy {
                        position_id: position.id,
                        user_id: position.user_id.clone(),
                        live_shares: position.shares,
                        ledger_shares: recorded,
                    });
                }
            }

            let audit = PoolAudit {
                pool_id: pool_id.clone(),
                total_shares: pool.total_shares,
                position_shares,
                ledger_shares,
                discrepancies,
            };
            if !audit.is_consistent() {
                warn!(
                    pool_id = %pool_id,
                    total_shares = %audit.total_shares,
                    position_shares = %audit.position_shares,
                    ledger_shares = %audit.ledger_shares,
                    discrepancies = audit.discrepancies.len(),
                    "pool audit failed"
                );
            }
            Ok(audit)
        })
    }
}
