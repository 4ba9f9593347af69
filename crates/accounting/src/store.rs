//! Persistence Port
//!
//! [`AccountingStore`] is everything the orchestrator needs from durable
//! storage: point reads of committed state and one all-or-nothing
//! [`AccountingStore::commit`] per operation.
//!
//! [`MemoryStore`] keeps everything behind a single `parking_lot::RwLock` and
//! can be snapshotted to Borsh bytes.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use poolshare_common::{
    errors::{PoolError, PoolResult},
    LedgerEntry, LedgerEntryId, NewLedgerEntry, Pool, PoolId, PositionId, StakingPosition, UserId,
};
use poolshare_ledger::Ledger;

// ============ Port ============

/// Writes produced by one operation, applied as a unit
#[derive(Debug, Clone, Default)]
pub struct Commit {
    /// Pool state after the operation
    pub pool: Option<Pool>,
    /// Positions created or modified
    pub positions: Vec<StakingPosition>,
    /// Ledger entries to append, in order
    pub entries: Vec<NewLedgerEntry>,
}

/// Storage for pools, positions and the ledger
pub trait AccountingStore: Send + Sync {
    /// Register a new pool.
    ///
    /// # Errors
    /// - `PoolAlreadyExists` if the id is taken
    fn insert_pool(&self, pool: Pool) -> PoolResult<()>;

    fn pool(&self, pool_id: &PoolId) -> PoolResult<Option<Pool>>;

    fn pool_ids(&self) -> PoolResult<Vec<PoolId>>;

    /// The user's active position in a pool, if any
    fn active_position(&self, pool_id: &PoolId, user_id: &UserId) -> PoolResult<Option<StakingPosition>>;

    /// Any position by id, active or closed
    fn position(&self, position_id: &PositionId) -> PoolResult<Option<StakingPosition>>;

    /// Active positions in a pool
    fn positions_for_pool(&self, pool_id: &PoolId) -> PoolResult<Vec<StakingPosition>>;

    /// Active positions of a user across pools
    fn positions_for_user(&self, user_id: &UserId) -> PoolResult<Vec<StakingPosition>>;

    /// A pool together with the user's active position, read from one
    /// committed state. `None` if the pool is not registered.
    fn pool_with_position(
        &self,
        pool_id: &PoolId,
        user_id: &UserId,
    ) -> PoolResult<Option<(Pool, Option<StakingPosition>)>>;

    /// A pool together with its active positions, read from one committed state
    fn pool_with_positions(&self, pool_id: &PoolId) -> PoolResult<Option<(Pool, Vec<StakingPosition>)>>;

    /// Ledger entries for a pool, optionally one user's, ascending by time
    fn ledger_entries(&self, pool_id: &PoolId, user_id: Option<&UserId>) -> PoolResult<Vec<LedgerEntry>>;

    /// Net shares the ledger records for a pool, optionally one user's
    fn ledger_shares(&self, pool_id: &PoolId, user_id: Option<&UserId>) -> PoolResult<Decimal>;

    /// Net shares the ledger records against one position
    fn ledger_position_shares(&self, pool_id: &PoolId, position_id: &PositionId) -> PoolResult<Decimal>;

    /// Apply every write in `commit` or none of them.
    ///
    /// # Errors
    /// - `PoolNotFound` if the committed pool is not registered
    /// - `InvalidEntry` if any ledger entry is rejected
    fn commit(&self, commit: Commit) -> PoolResult<Vec<LedgerEntryId>>;
}

// ============ In-Memory Store ============

#[derive(Debug, Default, BorshSerialize, BorshDeserialize)]
struct StoreState {
    pools: BTreeMap<PoolId, Pool>,
    positions: BTreeMap<PositionId, StakingPosition>,
    /// (pool, user) -> active position
    active: BTreeMap<(PoolId, UserId), PositionId>,
    ledger: Ledger,
}

impl StoreState {
    fn active_position(&self, pool_id: &PoolId, user_id: &UserId) -> Option<&StakingPosition> {
        self.active
            .get(&(pool_id.clone(), user_id.clone()))
            .and_then(|id| self.positions.get(id))
    }

    fn positions_for_pool<'a>(&'a self, pool_id: &'a PoolId) -> impl Iterator<Item = &'a StakingPosition> + 'a {
        self.active
            .iter()
            .filter(move |((pool, _), _)| pool == pool_id)
            .filter_map(|(_, id)| self.positions.get(id))
    }

    fn index_position(&mut self, position: &StakingPosition) {
        let key = (position.pool_id.clone(), position.user_id.clone());
        if position.is_active() {
            self.active.insert(key, position.id);
        } else if self.active.get(&key) == Some(&position.id) {
            self.active.remove(&key);
        }
    }
}

/// Thread-safe in-memory [`AccountingStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize the whole store
    pub fn snapshot(&self) -> PoolResult<Vec<u8>> {
        borsh::to_vec(&*self.state.read()).map_err(|e| PoolError::Storage(e.to_string()))
    }

    /// Rebuild a store from [`MemoryStore::snapshot`] bytes
    pub fn restore(bytes: &[u8]) -> PoolResult<Self> {
        let state: StoreState =
            borsh::from_slice(bytes).map_err(|e| PoolError::Storage(e.to_string()))?;
        Ok(Self { state: RwLock::new(state) })
    }

    /// Number of ledger entries across all pools
    pub fn ledger_len(&self) -> usize {
        self.state.read().ledger.len()
    }
}

impl AccountingStore for MemoryStore {
    fn insert_pool(&self, pool: Pool) -> PoolResult<()> {
        let mut state = self.state.write();
        if state.pools.contains_key(&pool.id) {
            return Err(PoolError::PoolAlreadyExists { pool_id: pool.id });
        }
        state.pools.insert(pool.id.clone(), pool);
        Ok(())
    }

    fn pool(&self, pool_id: &PoolId) -> PoolResult<Option<Pool>> {
        Ok(self.state.read().pools.get(pool_id).cloned())
    }

    fn pool_ids(&self) -> PoolResult<Vec<PoolId>> {
        Ok(self.state.read().pools.keys().cloned().collect())
    }

    fn active_position(&self, pool_id: &PoolId, user_id: &UserId) -> PoolResult<Option<StakingPosition>> {
        Ok(self.state.read().active_position(pool_id, user_id).cloned())
    }

    fn position(&self, position_id: &PositionId) -> PoolResult<Option<StakingPosition>> {
        Ok(self.state.read().positions.get(position_id).cloned())
    }

    fn positions_for_pool(&self, pool_id: &PoolId) -> PoolResult<Vec<StakingPosition>> {
        Ok(self.state.read().positions_for_pool(pool_id).cloned().collect())
    }

    fn positions_for_user(&self, user_id: &UserId) -> PoolResult<Vec<StakingPosition>> {
        let state = self.state.read();
        Ok(state
            .active
            .iter()
            .filter(|((_, user), _)| user == user_id)
            .filter_map(|(_, id)| state.positions.get(id))
            .cloned()
            .collect())
    }

    fn pool_with_position(
        &self,
        pool_id: &PoolId,
        user_id: &UserId,
    ) -> PoolResult<Option<(Pool, Option<StakingPosition>)>> {
        let state = self.state.read();
        Ok(state
            .pools
            .get(pool_id)
            .map(|pool| (pool.clone(), state.active_position(pool_id, user_id).cloned())))
    }

    fn pool_with_positions(&self, pool_id: &PoolId) -> PoolResult<Option<(Pool, Vec<StakingPosition>)>> {
        let state = self.state.read();
        Ok(state
            .pools
            .get(pool_id)
            .map(|pool| (pool.clone(), state.positions_for_pool(pool_id).cloned().collect())))
    }

    fn ledger_entries(&self, pool_id: &PoolId, user_id: Option<&UserId>) -> PoolResult<Vec<LedgerEntry>> {
        let state = self.state.read();
        Ok(state.ledger.entries_for(pool_id, user_id).cloned().collect())
    }

    fn ledger_shares(&self, pool_id: &PoolId, user_id: Option<&UserId>) -> PoolResult<Decimal> {
        self.state.read().ledger.reconstruct_shares(pool_id, user_id)
    }

    fn ledger_position_shares(&self, pool_id: &PoolId, position_id: &PositionId) -> PoolResult<Decimal> {
        self.state.read().ledger.reconstruct_position_shares(pool_id, position_id)
    }

    fn commit(&self, commit: Commit) -> PoolResult<Vec<LedgerEntryId>> {
        let mut state = self.state.write();

        if let Some(pool) = &commit.pool {
            if !state.pools.contains_key(&pool.id) {
                return Err(PoolError::PoolNotFound { pool_id: pool.id.clone() });
            }
        }
        for position in &commit.positions {
            if !state.pools.contains_key(&position.pool_id) {
                return Err(PoolError::PoolNotFound { pool_id: position.pool_id.clone() });
            }
        }

        // Ledger append validates the whole batch before writing anything
        let ids = state.ledger.append_batch(commit.entries)?;

        if let Some(pool) = commit.pool {
            state.pools.insert(pool.id.clone(), pool);
        }
        for position in commit.positions {
            state.index_position(&position);
            state.positions.insert(position.id, position);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolshare_common::{AssetId, LedgerEntryKind, PoolKind};
    use rust_decimal_macros::dec;

    fn honey_pool() -> Pool {
        Pool::new(PoolId::from("honey"), PoolKind::Honey, AssetId::from("HONEY"), 1)
    }

    fn deposit_commit(pool: &mut Pool, user: &str, amount: Decimal, ts: u64) -> (Commit, StakingPosition) {
        let mut position = StakingPosition::open(pool, UserId::from(user), ts);
        position.credit(amount).unwrap();
        pool.total_shares += amount;
        pool.apply_delta(&AssetId::from("HONEY"), amount).unwrap();
        let entry = NewLedgerEntry {
            pool_id: pool.id.clone(),
            user_id: Some(UserId::from(user)),
            asset_id: AssetId::from("HONEY"),
            kind: LedgerEntryKind::Deposit {
                position_id: position.id,
                opened_position: true,
            },
            asset_amount: amount,
            share_amount: amount,
            share_price_at_entry: dec!(1),
            timestamp: ts,
        };
        let commit = Commit {
            pool: Some(pool.clone()),
            positions: vec![position.clone()],
            entries: vec![entry],
        };
        (commit, position)
    }

    #[test]
    fn test_insert_pool_twice() {
        let store = MemoryStore::new();
        store.insert_pool(honey_pool()).unwrap();
        assert!(matches!(
            store.insert_pool(honey_pool()),
            Err(PoolError::PoolAlreadyExists { .. })
        ));
        assert_eq!(store.pool_ids().unwrap(), vec![PoolId::from("honey")]);
    }

    #[test]
    fn test_commit_writes_everything() {
        let store = MemoryStore::new();
        let mut pool = honey_pool();
        store.insert_pool(pool.clone()).unwrap();

        let (commit, position) = deposit_commit(&mut pool, "alice", dec!(100), 5);
        let ids = store.commit(commit).unwrap();

        assert_eq!(ids, vec![LedgerEntryId(1)]);
        assert_eq!(store.pool(&pool.id).unwrap().unwrap().total_shares, dec!(100));
        assert_eq!(
            store.active_position(&pool.id, &UserId::from("alice")).unwrap(),
            Some(position.clone())
        );
        assert_eq!(store.positions_for_pool(&pool.id).unwrap().len(), 1);
        assert_eq!(store.positions_for_user(&UserId::from("alice")).unwrap().len(), 1);
        assert_eq!(store.ledger_entries(&pool.id, None).unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_entry_leaves_store_untouched() {
        let store = MemoryStore::new();
        let mut pool = honey_pool();
        store.insert_pool(pool.clone()).unwrap();

        let (mut commit, _) = deposit_commit(&mut pool, "alice", dec!(100), 5);
        commit.entries[0].share_amount = dec!(-1);

        assert!(matches!(store.commit(commit), Err(PoolError::InvalidEntry { .. })));
        assert!(store.pool(&pool.id).unwrap().unwrap().is_empty());
        assert!(store.positions_for_pool(&pool.id).unwrap().is_empty());
        assert_eq!(store.ledger_len(), 0);
    }

    #[test]
    fn test_commit_unknown_pool() {
        let store = MemoryStore::new();
        let mut pool = honey_pool();
        let (commit, _) = deposit_commit(&mut pool, "alice", dec!(1), 5);
        assert!(matches!(store.commit(commit), Err(PoolError::PoolNotFound { .. })));
    }

    #[test]
    fn test_closed_position_leaves_active_index() {
        let store = MemoryStore::new();
        let mut pool = honey_pool();
        store.insert_pool(pool.clone()).unwrap();
        let (commit, mut position) = deposit_commit(&mut pool, "alice", dec!(1), 5);
        store.commit(commit).unwrap();

        position.debit(dec!(1), 6).unwrap();
        store
            .commit(Commit {
                pool: None,
                positions: vec![position.clone()],
                entries: vec![],
            })
            .unwrap();

        assert_eq!(store.active_position(&pool.id, &UserId::from("alice")).unwrap(), None);
        assert_eq!(store.position(&position.id).unwrap(), Some(position));
    }

    #[test]
    fn test_snapshot_restore() {
        let store = MemoryStore::new();
        let mut pool = honey_pool();
        store.insert_pool(pool.clone()).unwrap();
        let (commit, _) = deposit_commit(&mut pool, "alice", dec!(42), 5);
        store.commit(commit).unwrap();

        let restored = MemoryStore::restore(&store.snapshot().unwrap()).unwrap();
        assert_eq!(restored.pool(&pool.id).unwrap(), store.pool(&pool.id).unwrap());
        assert_eq!(
            restored.ledger_entries(&pool.id, None).unwrap(),
            store.ledger_entries(&pool.id, None).unwrap()
        );
        assert_eq!(
            restored.active_position(&pool.id, &UserId::from("alice")).unwrap(),
            store.active_position(&pool.id, &UserId::from("alice")).unwrap()
        );
    }

    #[test]
    fn test_combined_reads_match_point_reads() {
        let store = MemoryStore::new();
        let mut pool = honey_pool();
        store.insert_pool(pool.clone()).unwrap();
        let (commit, position) = deposit_commit(&mut pool, "alice", dec!(7), 5);
        store.commit(commit).unwrap();

        let (read_pool, read_position) = store
            .pool_with_position(&pool.id, &UserId::from("alice"))
            .unwrap()
            .unwrap();
        assert_eq!(read_pool, pool);
        assert_eq!(read_position, Some(position.clone()));

        let (_, none) = store
            .pool_with_position(&pool.id, &UserId::from("bob"))
            .unwrap()
            .unwrap();
        assert_eq!(none, None);

        let (_, positions) = store.pool_with_positions(&pool.id).unwrap().unwrap();
        assert_eq!(positions, vec![position]);

        assert_eq!(store.pool_with_positions(&PoolId::from("missing")).unwrap(), None);
    }

    #[test]
    fn test_ledger_share_totals() {
        let store = MemoryStore::new();
        let mut pool = honey_pool();
        store.insert_pool(pool.clone()).unwrap();
        let (commit, alice) = deposit_commit(&mut pool, "alice", dec!(30), 5);
        store.commit(commit).unwrap();
        let (commit, _) = deposit_commit(&mut pool, "bob", dec!(12), 6);
        store.commit(commit).unwrap();

        assert_eq!(store.ledger_shares(&pool.id, None).unwrap(), dec!(42));
        assert_eq!(store.ledger_shares(&pool.id, Some(&UserId::from("bob"))).unwrap(), dec!(12));
        assert_eq!(store.ledger_position_shares(&pool.id, &alice.id).unwrap(), dec!(30));
        assert_eq!(store.ledger_shares(&PoolId::from("missing"), None).unwrap(), dec!(0));
    }

    #[test]
    fn test_restore_garbage() {
        assert!(matches!(MemoryStore::restore(&[1, 2, 3]), Err(PoolError::Storage(_))));
    }
}
