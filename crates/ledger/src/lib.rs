//! Append-Only Ledger
//!
//! Immutable history of every value movement into and out of a pool. Entries
//! are validated on append, never mutated or deleted, and can be replayed to
//! reconstruct share balances for audit.
//!
//! The ledger records share prices as supplied by the caller; it never
//! computes them.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use poolshare_common::{
    check,
    errors::{PoolError, PoolResult},
    math, LedgerEntry, LedgerEntryId, LedgerEntryKind, NewLedgerEntry, PoolId, PositionId, Timestamp,
    UserId,
};

// ============ Validation ============

fn invalid(reason: &'static str) -> PoolError {
    PoolError::InvalidEntry { reason }
}

/// Validate an entry's content independent of ledger state.
///
/// # Errors
/// - `InvalidEntry` naming the first violated rule
pub fn validate(entry: &NewLedgerEntry) -> PoolResult<()> {
    let zero = Decimal::ZERO;
    check!(
        !entry.share_price_at_entry.is_sign_negative() || entry.share_price_at_entry.is_zero(),
        invalid("share price must not be negative")
    );

    match &entry.kind {
        LedgerEntryKind::Deposit { .. } => {
            check!(entry.user_id.is_some(), invalid("deposit requires a user"));
            check!(entry.asset_amount > zero, invalid("deposit asset amount must be positive"));
            check!(entry.share_amount > zero, invalid("deposit share amount must be positive"));
            check!(entry.share_price_at_entry > zero, invalid("deposit share price must be positive"));
        }
        LedgerEntryKind::Withdraw { .. } => {
            check!(entry.user_id.is_some(), invalid("withdraw requires a user"));
            check!(entry.asset_amount > zero, invalid("withdraw asset amount must be positive"));
            check!(entry.share_amount < zero, invalid("withdraw share amount must be negative"));
            check!(entry.share_price_at_entry > zero, invalid("withdraw share price must be positive"));
        }
        LedgerEntryKind::ExternalRevaluation { .. } => {
            check!(entry.user_id.is_none(), invalid("revaluation must not name a user"));
            check!(!entry.asset_amount.is_zero(), invalid("revaluation asset amount must be non-zero"));
            check!(entry.share_amount.is_zero(), invalid("revaluation must not move shares"));
        }
    }
    Ok(())
}

// ============ Ledger ============

/// Append-only store of ledger entries, indexed by pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Ledger {
    /// All entries; entry `n` has id `n + 1`
    entries: Vec<LedgerEntry>,
    /// Positions in `entries` per pool, in append (and time) order
    by_pool: BTreeMap<PoolId, Vec<u64>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries across all pools
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Id the next appended entry will receive
    pub fn next_id(&self) -> LedgerEntryId {
        LedgerEntryId(self.entries.len() as u64 + 1)
    }

    /// Timestamp of the latest entry for a pool
    pub fn last_timestamp(&self, pool_id: &PoolId) -> Option<Timestamp> {
        self.by_pool
            .get(pool_id)
            .and_then(|indices| indices.last())
            .and_then(|&i| self.entries.get(i as usize))
            .map(|entry| entry.timestamp)
    }

    /// Validate a batch of entries against the current ledger state without
    /// appending anything.
    ///
    /// # Errors
    /// - `InvalidEntry` if any entry is malformed or would go back in time
    ///   within its pool
    pub fn check_batch(&self, batch: &[NewLedgerEntry]) -> PoolResult<()> {
        let mut floors: BTreeMap<&PoolId, Timestamp> = BTreeMap::new();
        for entry in batch {
            validate(entry)?;
            let floor = match floors.get(&entry.pool_id) {
                Some(&ts) => Some(ts),
                None => self.last_timestamp(&entry.pool_id),
            };
            if let Some(floor) = floor {
                check!(entry.timestamp >= floor, invalid("timestamp precedes previous pool entry"));
            }
            floors.insert(&entry.pool_id, entry.timestamp);
        }
        Ok(())
    }

    /// Append one entry.
    ///
    /// # Errors
    /// - `InvalidEntry` if the entry fails validation
    pub fn append(&mut self, entry: NewLedgerEntry) -> PoolResult<LedgerEntryId> {
        self.check_batch(std::slice::from_ref(&entry))?;
        Ok(self.push(entry))
    }

    /// Append several entries, all or none.
    ///
    /// # Errors
    /// - `InvalidEntry` if any entry fails validation; nothing is appended
    pub fn append_batch(&mut self, batch: Vec<NewLedgerEntry>) -> PoolResult<Vec<LedgerEntryId>> {
        self.check_batch(&batch)?;
        Ok(batch.into_iter().map(|entry| self.push(entry)).collect())
    }

    fn push(&mut self, entry: NewLedgerEntry) -> LedgerEntryId {
        let id = self.next_id();
        let index = self.entries.len() as u64;
        debug!(
            id = id.0,
            pool_id = %entry.pool_id,
            tag = ?entry.kind.tag(),
            asset_amount = %entry.asset_amount,
            share_amount = %entry.share_amount,
            "ledger entry appended"
        );
        self.by_pool.entry(entry.pool_id.clone()).or_default().push(index);
        self.entries.push(LedgerEntry::assign(id, entry));
        id
    }

    /// Look up an entry by id
    pub fn entry(&self, id: LedgerEntryId) -> Option<&LedgerEntry> {
        let index = id.0.checked_sub(1)?;
        self.entries.get(usize::try_from(index).ok()?)
    }

    /// Entries for a pool, optionally filtered by user, ascending by time.
    ///
    /// The iterator is lazy and can be cloned to restart from the beginning.
    pub fn entries_for<'a>(
        &'a self,
        pool_id: &PoolId,
        user_id: Option<&'a UserId>,
    ) -> impl Iterator<Item = &'a LedgerEntry> + Clone + 'a {
        let indices: &'a [u64] = self
            .by_pool
            .get(pool_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        indices
            .iter()
            .filter_map(move |&i| self.entries.get(i as usize))
            .filter(move |entry| user_id.map_or(true, |user| entry.user_id.as_ref() == Some(user)))
    }

    /// Net share movement recorded for a pool (or one user in it)
    pub fn reconstruct_shares(&self, pool_id: &PoolId, user_id: Option<&UserId>) -> PoolResult<Decimal> {
        self.entries_for(pool_id, user_id)
            .try_fold(Decimal::ZERO, |acc, entry| math::checked_add(acc, entry.share_amount))
    }

    /// Net share movement recorded against one position
    pub fn reconstruct_position_shares(&self, pool_id: &PoolId, position_id: &PositionId) -> PoolResult<Decimal> {
        self.entries_for(pool_id, None)
            .filter(|entry| entry.kind.position_id().as_ref() == Some(position_id))
            .try_fold(Decimal::ZERO, |acc, entry| math::checked_add(acc, entry.share_amount))
    }

    /// Serialize the whole ledger for a durable snapshot
    pub fn to_bytes(&self) -> PoolResult<Vec<u8>> {
        borsh::to_vec(self).map_err(|e| PoolError::Storage(e.to_string()))
    }

    /// Restore a ledger snapshot
    pub fn from_bytes(bytes: &[u8]) -> PoolResult<Self> {
        borsh::from_slice(bytes).map_err(|e| PoolError::Storage(e.to_string()))
    }
}

// ============ Tests ============
