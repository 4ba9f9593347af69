//! Accounting configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use poolshare_common::constants::{locking::DEFAULT_LOCK_TIMEOUT_MS, precision::DEFAULT_SHARE_EPSILON};

/// Runtime settings for [`crate::PoolAccounting`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingConfig {
    /// How long an operation waits for its pool lock before `PoolBusy`
    pub lock_timeout_ms: u64,
    /// Tolerance for share comparisons
    pub share_epsilon: Decimal,
}

impl AccountingConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            share_epsilon: DEFAULT_SHARE_EPSILON,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AccountingConfig::default();
        assert_eq!(config.lock_timeout(), Duration::from_secs(3));
        assert_eq!(config.share_epsilon, DEFAULT_SHARE_EPSILON);
    }
}
