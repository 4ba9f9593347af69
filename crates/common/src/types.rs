//! Core Types for the Poolshare Core
//!
//! Entities shared by the ledger, oracle and accounting crates: identifiers,
//! pools, staking positions, ledger entries and settlements.

use std::collections::BTreeMap;
use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{PoolError, PoolResult};
use crate::math;

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

// ============ Identifiers ============

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
            Serialize, Deserialize, BorshSerialize, BorshDeserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an opaque identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Opaque pool identifier
    PoolId
);
string_id!(
    /// Opaque user identifier
    UserId
);
string_id!(
    /// Opaque asset identifier (e.g. "HONEY", "BTC", a property token)
    AssetId
);

/// Position identifier: SHA-256 of pool, user, open time and pool nonce
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct PositionId(pub [u8; 32]);

impl PositionId {
    /// Generate a deterministic position ID
    pub fn derive(pool_id: &PoolId, user_id: &UserId, opened_at: Timestamp, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(pool_id.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(user_id.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(opened_at.to_le_bytes());
        hasher.update(nonce.to_le_bytes());
        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        Self(id)
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Ledger sequence number, assigned on append
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct LedgerEntryId(pub u64);

// ============ Pool Types ============

/// Primary backing asset family of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[serde(rename_all = "camelCase")]
pub enum PoolKind {
    /// Bitcoin-denominated pool
    Bitcoin,
    /// HONEY-denominated pool
    Honey,
    /// Tokenized real-estate debt
    RealEstate,
    /// Tokenized commodity
    Commodity,
    /// Anything else, tagged by name
    Other(String),
}

/// Aggregate state of one shared liquidity pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Pool {
    /// Pool identifier
    pub id: PoolId,
    /// Backing asset family
    pub kind: PoolKind,
    /// Asset deposits and withdrawals are denominated in
    pub main_asset_id: AssetId,
    /// Outstanding shares across all active positions
    pub total_shares: Decimal,
    /// Quantity held per asset; zero quantities are never stored
    pub asset_composition: BTreeMap<AssetId, Decimal>,
    /// Registration time
    pub created_at: Timestamp,
    /// Last committed mutation, never decreases
    pub updated_at: Timestamp,
    /// Counter mixed into position ids
    pub next_position_nonce: u64,
}

impl Pool {
    /// Create an empty pool
    pub fn new(id: PoolId, kind: PoolKind, main_asset_id: AssetId, now: Timestamp) -> Self {
        Self {
            id,
            kind,
            main_asset_id,
            total_shares: Decimal::ZERO,
            asset_composition: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            next_position_nonce: 0,
        }
    }

    /// True when no shares are outstanding (share price undefined)
    pub fn is_empty(&self) -> bool {
        self.total_shares.is_zero()
    }

    /// Quantity held of `asset_id`
    pub fn holding(&self, asset_id: &AssetId) -> Decimal {
        self.asset_composition
            .get(asset_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Main-asset quantity available to pay out withdrawals
    pub fn liquid_reserve(&self) -> Decimal {
        self.holding(&self.main_asset_id)
    }

    /// Adjust `asset_composition[asset_id] += delta`.
    ///
    /// # Errors
    /// - `CompositionUnderflow` if the quantity would go negative
    /// - `Overflow` on decimal overflow
    pub fn apply_delta(&mut self, asset_id: &AssetId, delta: Decimal) -> PoolResult<()> {
        let held = self.holding(asset_id);
        let updated = math::checked_add(held, delta)?;
        if updated.is_sign_negative() && !updated.is_zero() {
            return Err(PoolError::CompositionUnderflow {
                asset_id: asset_id.clone(),
                held,
                delta,
            });
        }
        if updated.is_zero() {
            self.asset_composition.remove(asset_id);
        } else {
            self.asset_composition.insert(asset_id.clone(), updated);
        }
        Ok(())
    }

    /// Advance `updated_at` to `now`, never backwards. Returns the effective time.
    pub fn touch(&mut self, now: Timestamp) -> Timestamp {
        self.updated_at = self.updated_at.max(now);
        self.updated_at
    }

    /// Take the next nonce for a position id
    pub fn take_position_nonce(&mut self) -> u64 {
        let nonce = self.next_position_nonce;
        self.next_position_nonce += 1;
        nonce
    }
}

// ============ Position Types ============

/// Lifecycle of a staking position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum PositionStatus {
    /// Position holds shares and can be modified
    #[default]
    Active,
    /// Shares reached zero; position is history only
    Closed,
}

/// A user's claim on a pool, expressed in shares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct StakingPosition {
    /// Position identifier
    pub id: PositionId,
    /// Owner
    pub user_id: UserId,
    /// Pool the claim is on
    pub pool_id: PoolId,
    /// Share count, never negative
    pub shares: Decimal,
    /// First deposit time
    pub opened_at: Timestamp,
    /// Set when the position closes
    pub closed_at: Option<Timestamp>,
    /// Current status
    pub status: PositionStatus,
}

impl StakingPosition {
    /// Open a new position with zero shares
    pub fn open(pool: &mut Pool, user_id: UserId, now: Timestamp) -> Self {
        let nonce = pool.take_position_nonce();
        Self {
            id: PositionId::derive(&pool.id, &user_id, now, nonce),
            user_id,
            pool_id: pool.id.clone(),
            shares: Decimal::ZERO,
            opened_at: now,
            closed_at: None,
            status: PositionStatus::Active,
        }
    }

    /// Returns true if position is active
    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    /// Add issued shares
    pub fn credit(&mut self, shares: Decimal) -> PoolResult<()> {
        self.shares = math::checked_add(self.shares, shares)?;
        Ok(())
    }

    /// Burn shares; the caller has already checked sufficiency.
    /// Closes the position when the balance reaches exactly zero.
    pub fn debit(&mut self, shares: Decimal, now: Timestamp) -> PoolResult<()> {
        let remaining = math::checked_sub(self.shares, shares)?;
        if remaining.is_sign_negative() && !remaining.is_zero() {
            return Err(PoolError::InsufficientShares {
                requested: shares,
                available: self.shares,
            });
        }
        self.shares = remaining;
        if self.shares.is_zero() {
            self.shares = Decimal::ZERO;
            self.status = PositionStatus::Closed;
            self.closed_at = Some(now);
        }
        Ok(())
    }
}

// ============ Ledger Types ============

/// Entry tag for indexing and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum EntryTag {
    Deposit = 0x01,
    Withdraw = 0x02,
    ExternalRevaluation = 0x10,
}

/// Why a settlement changed the pool composition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RevaluationReason {
    /// Pool bought an asset; `counter_asset_id` is the other leg
    Purchase { counter_asset_id: AssetId },
    /// Pool sold an asset; `counter_asset_id` is the other leg
    Sale { counter_asset_id: AssetId },
    /// Income accrued to the pool (loan interest, rent)
    Yield,
    /// Holding impaired
    WriteDown,
    /// Manual correction by the settlement process
    Adjustment,
}

/// Tagged ledger entry kind with its typed payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum LedgerEntryKind {
    /// User deposited the main asset and received shares
    Deposit { position_id: PositionId, opened_position: bool },
    /// User redeemed shares for the main asset
    Withdraw { position_id: PositionId, closed_position: bool },
    /// Composition changed by settlement outside this core
    ExternalRevaluation { reason: RevaluationReason },
}

impl LedgerEntryKind {
    /// Get the entry tag for filtering
    pub fn tag(&self) -> EntryTag {
        match self {
            Self::Deposit { .. } => EntryTag::Deposit,
            Self::Withdraw { .. } => EntryTag::Withdraw,
            Self::ExternalRevaluation { .. } => EntryTag::ExternalRevaluation,
        }
    }

    /// Position touched by the entry, if any
    pub fn position_id(&self) -> Option<PositionId> {
        match self {
            Self::Deposit { position_id, .. } | Self::Withdraw { position_id, .. } => {
                Some(*position_id)
            }
            Self::ExternalRevaluation { .. } => None,
        }
    }
}

/// Entry as supplied by the caller, before the ledger assigns an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct NewLedgerEntry {
    pub pool_id: PoolId,
    /// Absent for external revaluations
    pub user_id: Option<UserId>,
    /// Asset whose quantity moved
    pub asset_id: AssetId,
    pub kind: LedgerEntryKind,
    /// Signed quantity of `asset_id` that moved (withdraw amounts are positive)
    pub asset_amount: Decimal,
    /// Signed share delta: positive on deposit, negative on withdraw, zero otherwise
    pub share_amount: Decimal,
    /// Share price used for the movement, recorded for audit
    pub share_price_at_entry: Decimal,
    pub timestamp: Timestamp,
}

/// Immutable ledger record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub pool_id: PoolId,
    pub user_id: Option<UserId>,
    pub asset_id: AssetId,
    pub kind: LedgerEntryKind,
    pub asset_amount: Decimal,
    pub share_amount: Decimal,
    pub share_price_at_entry: Decimal,
    pub timestamp: Timestamp,
}

impl LedgerEntry {
    /// Stamp a new entry with its ledger id
    pub fn assign(id: LedgerEntryId, entry: NewLedgerEntry) -> Self {
        Self {
            id,
            pool_id: entry.pool_id,
            user_id: entry.user_id,
            asset_id: entry.asset_id,
            kind: entry.kind,
            asset_amount: entry.asset_amount,
            share_amount: entry.share_amount,
            share_price_at_entry: entry.share_price_at_entry,
            timestamp: entry.timestamp,
        }
    }

    /// Get the entry tag
    pub fn tag(&self) -> EntryTag {
        self.kind.tag()
    }

    /// Serialize entry to bytes for storage
    pub fn to_bytes(&self) -> PoolResult<Vec<u8>> {
        borsh::to_vec(self).map_err(|e| PoolError::Storage(e.to_string()))
    }

    /// Deserialize entry from bytes
    pub fn from_bytes(bytes: &[u8]) -> PoolResult<Self> {
        borsh::from_slice(bytes).map_err(|e| PoolError::Storage(e.to_string()))
    }
}

// ============ Settlement Types ============

/// One composition change within a settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct SettlementLeg {
    pub asset_id: AssetId,
    pub delta: Decimal,
    pub reason: RevaluationReason,
}

/// Composition changes decided by the external settlement process,
/// applied to a pool as one unit
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Settlement {
    pub legs: Vec<SettlementLeg>,
}

impl Settlement {
    /// Single-asset revaluation
    pub fn revaluation(asset_id: AssetId, delta: Decimal, reason: RevaluationReason) -> Self {
        Self {
            legs: vec![SettlementLeg { asset_id, delta, reason }],
        }
    }

    /// Pool pays `cost` of `pay_asset` to acquire `quantity` of `asset_id`
    pub fn purchase(pay_asset: AssetId, cost: Decimal, asset_id: AssetId, quantity: Decimal) -> Self {
        Self {
            legs: vec![
                SettlementLeg {
                    asset_id: pay_asset.clone(),
                    delta: -cost,
                    reason: RevaluationReason::Purchase {
                        counter_asset_id: asset_id.clone(),
                    },
                },
                SettlementLeg {
                    asset_id,
                    delta: quantity,
                    reason: RevaluationReason::Purchase {
                        counter_asset_id: pay_asset,
                    },
                },
            ],
        }
    }

    /// Pool sells `quantity` of `asset_id` for `proceeds` of `receive_asset`
    pub fn sale(asset_id: AssetId, quantity: Decimal, receive_asset: AssetId, proceeds: Decimal) -> Self {
        Self {
            legs: vec![
                SettlementLeg {
                    asset_id: asset_id.clone(),
                    delta: -quantity,
                    reason: RevaluationReason::Sale {
                        counter_asset_id: receive_asset.clone(),
                    },
                },
                SettlementLeg {
                    asset_id: receive_asset,
                    delta: proceeds,
                    reason: RevaluationReason::Sale {
                        counter_asset_id: asset_id,
                    },
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn honey_pool() -> Pool {
        Pool::new(PoolId::from("honey"), PoolKind::Honey, AssetId::from("HONEY"), 1_000)
    }

    #[test]
    fn test_new_pool_is_empty() {
        let pool = honey_pool();
        assert!(pool.is_empty());
        assert!(pool.asset_composition.is_empty());
        assert_eq!(pool.liquid_reserve(), Decimal::ZERO);
    }

    #[test]
    fn test_apply_delta_removes_zero_holdings() {
        let mut pool = honey_pool();
        let honey = AssetId::from("HONEY");

        pool.apply_delta(&honey, dec!(100)).unwrap();
        assert_eq!(pool.holding(&honey), dec!(100));

        pool.apply_delta(&honey, dec!(-100)).unwrap();
        assert!(pool.asset_composition.is_empty());
    }

    #[test]
    fn test_apply_delta_underflow() {
        let mut pool = honey_pool();
        let gold = AssetId::from("GOLD");
        pool.apply_delta(&gold, dec!(5)).unwrap();

        let result = pool.apply_delta(&gold, dec!(-6));
        assert!(matches!(result, Err(PoolError::CompositionUnderflow { .. })));
        assert_eq!(pool.holding(&gold), dec!(5));
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut pool = honey_pool();
        assert_eq!(pool.touch(2_000), 2_000);
        assert_eq!(pool.touch(1_500), 2_000);
    }

    #[test]
    fn test_position_ids_differ_per_nonce() {
        let mut pool = honey_pool();
        let a = StakingPosition::open(&mut pool, UserId::from("alice"), 5);
        let b = StakingPosition::open(&mut pool, UserId::from("alice"), 5);
        assert_ne!(a.id, b.id);
        assert_eq!(pool.next_position_nonce, 2);
    }

    #[test]
    fn test_debit_to_zero_closes() {
        let mut pool = honey_pool();
        let mut position = StakingPosition::open(&mut pool, UserId::from("bob"), 10);
        position.credit(dec!(40)).unwrap();

        position.debit(dec!(15), 11).unwrap();
        assert!(position.is_active());

        position.debit(dec!(25), 12).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.closed_at, Some(12));
    }

    #[test]
    fn test_debit_beyond_balance_rejected() {
        let mut pool = honey_pool();
        let mut position = StakingPosition::open(&mut pool, UserId::from("bob"), 10);
        position.credit(dec!(1)).unwrap();

        let result = position.debit(dec!(2), 11);
        assert!(matches!(result, Err(PoolError::InsufficientShares { .. })));
        assert_eq!(position.shares, dec!(1));
    }

    #[test]
    fn test_purchase_settlement_legs() {
        let settlement = Settlement::purchase(
            AssetId::from("HONEY"),
            dec!(90),
            AssetId::from("LOT-7"),
            dec!(1),
        );
        assert_eq!(settlement.legs.len(), 2);
        assert_eq!(settlement.legs[0].delta, dec!(-90));
        assert_eq!(settlement.legs[1].delta, dec!(1));
    }

    #[test]
    fn test_entry_serialization() {
        let entry = LedgerEntry::assign(
            LedgerEntryId(7),
            NewLedgerEntry {
                pool_id: PoolId::from("honey"),
                user_id: Some(UserId::from("alice")),
                asset_id: AssetId::from("HONEY"),
                kind: LedgerEntryKind::Deposit {
                    position_id: PositionId([3u8; 32]),
                    opened_position: true,
                },
                asset_amount: dec!(100),
                share_amount: dec!(100),
                share_price_at_entry: dec!(1),
                timestamp: 42,
            },
        );

        let bytes = entry.to_bytes().unwrap();
        let restored = LedgerEntry::from_bytes(&bytes).unwrap();
        assert_eq!(entry, restored);
        assert_eq!(restored.tag(), EntryTag::Deposit);
    }
}
