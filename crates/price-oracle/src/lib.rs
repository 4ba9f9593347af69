//! Price Oracle
//!
//! The accounting core consumes prices through the [`PriceOracle`] trait and
//! refuses to value a pool when any held asset cannot be priced.
//!
//! [`PriceBook`] is a thread-safe in-process implementation: prices are
//! listed and updated by an operator, go stale after a configurable age, and
//! updates that move too far from the last price are rejected.

use std::collections::BTreeMap;
use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use poolshare_common::{
    constants::oracle::{DEFAULT_MAX_PRICE_AGE_MS, DEFAULT_MAX_PRICE_DEVIATION_BPS},
    errors::{PoolError, PoolResult, PriceUnavailableReason},
    math::price_deviation_bps,
    validation::require_positive,
    AssetId, Clock, Timestamp,
};

// ============ Oracle Capability ============

/// Source of asset prices, quoted in one common currency
pub trait PriceOracle: Send + Sync {
    /// Current price of one unit of `asset_id`.
    ///
    /// # Errors
    /// - `PriceUnavailable` if the asset has no usable price
    fn price_of(&self, asset_id: &AssetId) -> PoolResult<Decimal>;
}

impl<T: PriceOracle + ?Sized> PriceOracle for Arc<T> {
    fn price_of(&self, asset_id: &AssetId) -> PoolResult<Decimal> {
        (**self).price_of(asset_id)
    }
}

impl<T: PriceOracle + ?Sized> PriceOracle for &T {
    fn price_of(&self, asset_id: &AssetId) -> PoolResult<Decimal> {
        (**self).price_of(asset_id)
    }
}

// ============ Price Data ============

/// Where a price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[serde(rename_all = "camelCase")]
pub enum PriceSource {
    /// Set by an operator
    #[default]
    Manual,
    /// Pushed by an external feed
    Feed,
    /// Derived from a settlement trade
    Settlement,
}

/// Last known price of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct PriceData {
    pub price: Decimal,
    pub updated_at: Timestamp,
    pub source: PriceSource,
}

impl PriceData {
    pub fn new(price: Decimal, updated_at: Timestamp, source: PriceSource) -> Self {
        Self { price, updated_at, source }
    }

    /// Checks if price is older than `max_age_ms` at `now`
    pub fn is_stale(&self, now: Timestamp, max_age_ms: u64) -> bool {
        now.saturating_sub(self.updated_at) > max_age_ms
    }
}

// ============ Configuration ============

/// Freshness and manipulation limits for a [`PriceBook`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceBookConfig {
    /// Maximum price age before it is stale
    pub max_age_ms: u64,
    /// Maximum move per update in basis points; 0 disables the check
    pub max_deviation_bps: u64,
}

impl Default for PriceBookConfig {
    fn default() -> Self {
        Self {
            max_age_ms: DEFAULT_MAX_PRICE_AGE_MS,
            max_deviation_bps: DEFAULT_MAX_PRICE_DEVIATION_BPS,
        }
    }
}

// ============ Price Book ============

/// Thread-safe map of asset prices
pub struct PriceBook {
    prices: RwLock<BTreeMap<AssetId, PriceData>>,
    config: PriceBookConfig,
    clock: Arc<dyn Clock>,
}

impl PriceBook {
    pub fn new(config: PriceBookConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            prices: RwLock::new(BTreeMap::new()),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &PriceBookConfig {
        &self.config
    }

    /// List an asset or overwrite its price without the deviation check.
    ///
    /// # Errors
    /// - `InvalidAmount` if `price` is not positive
    pub fn set_price(&self, asset_id: AssetId, price: Decimal, source: PriceSource) -> PoolResult<()> {
        require_positive(price)?;
        let now = self.clock.now_ms();
        info!(asset_id = %asset_id, %price, ?source, "price listed");
        self.prices
            .write()
            .insert(asset_id, PriceData::new(price, now, source));
        Ok(())
    }

    /// Update a listed asset's price.
    ///
    /// # Errors
    /// - `InvalidAmount` if `price` is not positive
    /// - `PriceUnavailable` if the asset is not listed
    /// - `PriceDeviation` if the move exceeds `max_deviation_bps`
    pub fn update_price(&self, asset_id: &AssetId, price: Decimal, source: PriceSource) -> PoolResult<()> {
        require_positive(price)?;
        let now = self.clock.now_ms();
        let mut prices = self.prices.write();
        let current = prices.get_mut(asset_id).ok_or_else(|| PoolError::PriceUnavailable {
            asset_id: asset_id.clone(),
            reason: PriceUnavailableReason::Unknown,
        })?;

        let max = self.config.max_deviation_bps;
        let deviation = price_deviation_bps(current.price, price);
        if max > 0 && deviation > max {
            warn!(asset_id = %asset_id, old_price = %current.price, new_price = %price, deviation, "price update rejected");
            return Err(PoolError::PriceDeviation {
                asset_id: asset_id.clone(),
                old_price: current.price,
                new_price: price,
                max_deviation_bps: max,
            });
        }

        debug!(asset_id = %asset_id, old_price = %current.price, new_price = %price, "price updated");
        *current = PriceData::new(price, now, source);
        Ok(())
    }

    /// Remove an asset; later lookups fail with `PriceUnavailable`
    pub fn delist(&self, asset_id: &AssetId) -> Option<PriceData> {
        let removed = self.prices.write().remove(asset_id);
        if removed.is_some() {
            info!(asset_id = %asset_id, "price delisted");
        }
        removed
    }

    /// Raw price record, fresh or not
    pub fn price_data(&self, asset_id: &AssetId) -> Option<PriceData> {
        self.prices.read().get(asset_id).cloned()
    }

    /// Check if the asset has a fresh price
    pub fn is_price_fresh(&self, asset_id: &AssetId) -> bool {
        let now = self.clock.now_ms();
        self.prices
            .read()
            .get(asset_id)
            .is_some_and(|data| !data.is_stale(now, self.config.max_age_ms))
    }

    /// Last known price and whether it is stale.
    ///
    /// For display only; accounting must go through [`PriceOracle::price_of`].
    pub fn price_for_display(&self, asset_id: &AssetId) -> Option<(Decimal, bool)> {
        let now = self.clock.now_ms();
        self.prices
            .read()
            .get(asset_id)
            .map(|data| (data.price, data.is_stale(now, self.config.max_age_ms)))
    }

    /// Listed assets in id order
    pub fn assets(&self) -> Vec<AssetId> {
        self.prices.read().keys().cloned().collect()
    }
}

impl PriceOracle for PriceBook {
    fn price_of(&self, asset_id: &AssetId) -> PoolResult<Decimal> {
        let now = self.clock.now_ms();
        let prices = self.prices.read();
        let data = prices.get(asset_id).ok_or_else(|| PoolError::PriceUnavailable {
            asset_id: asset_id.clone(),
            reason: PriceUnavailableReason::Unknown,
        })?;
        if data.is_stale(now, self.config.max_age_ms) {
            return Err(PoolError::PriceUnavailable {
                asset_id: asset_id.clone(),
                reason: PriceUnavailableReason::Stale,
            });
        }
        Ok(data.price)
    }
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;
    use poolshare_common::ManualClock;
    use rust_decimal_macros::dec;

    fn book_with_clock() -> (PriceBook, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let book = PriceBook::new(PriceBookConfig::default(), clock.clone());
        (book, clock)
    }

    fn btc() -> AssetId {
        AssetId::from("BTC")
    }

    #[test]
    fn test_listed_price() {
        let (book, _) = book_with_clock();
        book.set_price(btc(), dec!(100000), PriceSource::Manual).unwrap();
        assert_eq!(book.price_of(&btc()).unwrap(), dec!(100000));
    }

    #[test]
    fn test_unknown_asset() {
        let (book, _) = book_with_clock();
        let result = book.price_of(&AssetId::from("GOLD"));
        assert!(matches!(
            result,
            Err(PoolError::PriceUnavailable { reason: PriceUnavailableReason::Unknown, .. })
        ));
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let (book, _) = book_with_clock();
        assert!(matches!(
            book.set_price(btc(), dec!(0), PriceSource::Manual),
            Err(PoolError::InvalidAmount { .. })
        ));
        book.set_price(btc(), dec!(10), PriceSource::Manual).unwrap();
        assert!(matches!(
            book.update_price(&btc(), dec!(-1), PriceSource::Feed),
            Err(PoolError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_update_price_success() {
        let (book, clock) = book_with_clock();
        book.set_price(btc(), dec!(100000), PriceSource::Manual).unwrap();
        clock.advance(10);

        book.update_price(&btc(), dec!(101000), PriceSource::Feed).unwrap();
        let data = book.price_data(&btc()).unwrap();
        assert_eq!(data.price, dec!(101000));
        assert_eq!(data.updated_at, 1_010);
        assert_eq!(data.source, PriceSource::Feed);
    }

    #[test]
    fn test_update_price_too_large_deviation() {
        let clock = Arc::new(ManualClock::new(0));
        let config = PriceBookConfig { max_deviation_bps: 500, ..Default::default() };
        let book = PriceBook::new(config, clock);
        book.set_price(btc(), dec!(100000), PriceSource::Manual).unwrap();

        let result = book.update_price(&btc(), dec!(120000), PriceSource::Feed);
        assert!(matches!(result, Err(PoolError::PriceDeviation { max_deviation_bps: 500, .. })));
        assert_eq!(book.price_of(&btc()).unwrap(), dec!(100000));
    }

    #[test]
    fn test_deviation_check_disabled() {
        let clock = Arc::new(ManualClock::new(0));
        let config = PriceBookConfig { max_deviation_bps: 0, ..Default::default() };
        let book = PriceBook::new(config, clock);
        book.set_price(btc(), dec!(1), PriceSource::Manual).unwrap();

        book.update_price(&btc(), dec!(1000), PriceSource::Feed).unwrap();
        assert_eq!(book.price_of(&btc()).unwrap(), dec!(1000));
    }

    #[test]
    fn test_update_unlisted_asset() {
        let (book, _) = book_with_clock();
        let result = book.update_price(&btc(), dec!(1), PriceSource::Feed);
        assert!(matches!(result, Err(PoolError::PriceUnavailable { .. })));
    }

    #[test]
    fn test_price_staleness() {
        let (book, clock) = book_with_clock();
        book.set_price(btc(), dec!(100000), PriceSource::Manual).unwrap();
        assert!(book.is_price_fresh(&btc()));

        clock.advance(DEFAULT_MAX_PRICE_AGE_MS + 1);
        assert!(!book.is_price_fresh(&btc()));
        assert!(matches!(
            book.price_of(&btc()),
            Err(PoolError::PriceUnavailable { reason: PriceUnavailableReason::Stale, .. })
        ));
    }

    #[test]
    fn test_price_for_display_returns_stale_flag() {
        let (book, clock) = book_with_clock();
        book.set_price(btc(), dec!(42), PriceSource::Manual).unwrap();
        assert_eq!(book.price_for_display(&btc()), Some((dec!(42), false)));

        clock.advance(DEFAULT_MAX_PRICE_AGE_MS + 1);
        assert_eq!(book.price_for_display(&btc()), Some((dec!(42), true)));
        assert_eq!(book.price_for_display(&AssetId::from("GOLD")), None);
    }

    #[test]
    fn test_delist() {
        let (book, _) = book_with_clock();
        book.set_price(btc(), dec!(5), PriceSource::Manual).unwrap();
        assert!(book.delist(&btc()).is_some());
        assert!(book.delist(&btc()).is_none());
        assert!(book.price_of(&btc()).is_err());
        assert!(book.assets().is_empty());
    }

    #[test]
    fn test_oracle_through_arc() {
        let (book, _) = book_with_clock();
        book.set_price(btc(), dec!(7), PriceSource::Manual).unwrap();
        let shared: Arc<dyn PriceOracle> = Arc::new(book);
        assert_eq!(shared.price_of(&btc()).unwrap(), dec!(7));
    }
}
