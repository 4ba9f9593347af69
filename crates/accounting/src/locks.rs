//! Per-pool mutual exclusion.
//!
//! Every mutating operation on a pool runs inside [`PoolLocks::with_pool`].
//! A pool gets its lock when it is registered; ids that were never
//! registered are refused without touching the registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use poolshare_common::{
    errors::{PoolError, PoolResult},
    PoolId,
};

/// Registry of per-pool locks with a bounded wait
#[derive(Debug)]
pub struct PoolLocks {
    locks: Mutex<HashMap<PoolId, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl PoolLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Create the lock for a pool. Registering twice keeps the first lock.
    pub fn register(&self, pool_id: &PoolId) {
        self.locks
            .lock()
            .entry(pool_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())));
    }

    pub fn is_registered(&self, pool_id: &PoolId) -> bool {
        self.locks.lock().contains_key(pool_id)
    }

    /// Number of registered pools
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    /// Run `f` while holding the pool's lock.
    ///
    /// # Errors
    /// - `PoolNotFound` if the pool was never registered; `f` is not called
    /// - `PoolBusy` if the lock is not acquired within the timeout;
    ///   `f` is not called
    pub fn with_pool<T>(&self, pool_id: &PoolId, f: impl FnOnce() -> PoolResult<T>) -> PoolResult<T> {
        let lock = self
            .locks
            .lock()
            .get(pool_id)
            .cloned()
            .ok_or_else(|| PoolError::PoolNotFound { pool_id: pool_id.clone() })?;
        let Some(_guard) = lock.try_lock_for(self.timeout) else {
            let waited_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(pool_id = %pool_id, waited_ms, "pool lock timed out");
            return Err(PoolError::PoolBusy {
                pool_id: pool_id.clone(),
                waited_ms,
            });
        };
        f()
    }
}
