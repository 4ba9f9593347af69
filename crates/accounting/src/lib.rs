//! Pool Share Accounting
//!
//! Deposit, withdrawal and proportional-share accounting over shared
//! liquidity pools whose composition changes through external settlement.
//!
//! ## Share Model
//!
//! A user's claim is a share count, never a raw asset balance:
//!
//! ```text
//! share_price    = pool_value / total_shares
//! shares_issued  = deposit    / share_price      (rounded down)
//! shares_burned  = withdrawal / share_price      (rounded up)
//! position_value = shares     * share_price
//! ```
//!
//! Settlement (the pool buying a discounted asset with its reserve, yield,
//! write-downs) changes `pool_value` without touching `total_shares`, which
//! moves every holder's value without diluting anyone's shares.
//!
//! ```rust,ignore
//! let accounting = PoolAccounting::new(MemoryStore::new(), price_book, SystemClock, AccountingConfig::default());
//! accounting.create_pool(pool_id.clone(), PoolKind::Honey, AssetId::from("HONEY"))?;
//! accounting.deposit(&user_id, &pool_id, dec!(100))?;
//! ```

pub mod config;
pub mod engine;
pub mod locks;
pub mod pool_account;
pub mod position;
pub mod store;


// Re-exports for convenience
pub use config::AccountingConfig;
pub use engine::{PoolAccounting, PoolAudit, PositionDiscrepancy};
pub use pool_account::{AssetValuation, PoolStats, SharePrice};
pub use store::{AccountingStore, Commit, MemoryStore};
