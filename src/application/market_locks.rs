use crate::domain::market::Market;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};

/// Number of lock stripes. Distinct markets may share a stripe; that only
/// costs a little extra serialization, never correctness.
const STRIPES: usize = 16;

/// Striped per-market locks used by the pending-order manager and the
/// close-recovery queue to keep cancel/fetch/write sequences for one market
/// from interleaving. A fixed stripe set avoids a lock map that leaks entries.
pub struct MarketLocks {
    stripes: Vec<Mutex<()>>,
}

impl MarketLocks {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, market: &Market) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        market.as_str().hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % STRIPES]
    }

    /// Waits for the market's stripe.
    pub async fn lock(&self, market: &Market) -> MutexGuard<'_, ()> {
        self.stripe(market).lock().await
    }

    /// Non-blocking acquire; `None` when the stripe is busy.
    pub fn try_lock(&self, market: &Market) -> Option<MutexGuard<'_, ()>> {
        self.stripe(market).try_lock().ok()
    }
}

impl Default for MarketLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_market_serializes() {
        let locks = MarketLocks::new();
        let market = Market::parse("KRW-BTC").unwrap();
        let guard = locks.lock(&market).await;
        assert!(locks.try_lock(&market).is_none());
        drop(guard);
        assert!(locks.try_lock(&market).is_some());
    }

    #[tokio::test]
    async fn test_try_lock_guard_releases_on_drop() {
        let locks = MarketLocks::new();
        let market = Market::parse("KRW-ETH").unwrap();
        {
            let _guard = locks.try_lock(&market).unwrap();
            assert!(locks.try_lock(&market).is_none());
        }
        assert!(locks.try_lock(&market).is_some());
    }
}
