use crate::domain::market::Market;
use crate::domain::repositories::PositionRepository;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct PositionSummary {
    pub market: String,
    pub strategy: String,
    pub quantity: String,
    pub entry_price: String,
}

/// The single serialization point for "this market, now".
///
/// `try_acquire` holds the claim mutex across the persistent double-check so
/// that no two strategies can both succeed on the same market. The in-memory
/// claim survives the whole entry flow; callers release it on entry failure or
/// when the position closes.
pub struct PositionRegistry {
    /// market -> owning strategy
    claims: Mutex<HashMap<String, String>>,
    positions: Arc<dyn PositionRepository>,
    cache_ttl: Duration,
    open_cache: std::sync::Mutex<HashMap<String, (bool, Instant)>>,
}

impl PositionRegistry {
    pub fn new(positions: Arc<dyn PositionRepository>, cache_ttl: Duration) -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
            positions,
            cache_ttl: cache_ttl.min(Duration::from_secs(5)),
            open_cache: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Attempt to claim the market for an entry. Returns false when another
    /// claim exists or any strategy already holds an open persisted position
    /// for the market. Failure is silent by design; callers just skip.
    pub async fn try_acquire(&self, market: &Market, strategy: &str) -> Result<bool> {
        let mut claims = self.claims.lock().await;
        if claims.contains_key(market.as_str()) {
            debug!(
                "PositionRegistry: {} already claimed, {} skips",
                market, strategy
            );
            return Ok(false);
        }

        // Double-check against the store while still holding the claim lock:
        // the store is the source of truth for position existence.
        let open = self.positions.find_open_by_market(market).await?;
        if !open.is_empty() {
            debug!(
                "PositionRegistry: {} has {} open persisted position(s), {} skips",
                market,
                open.len(),
                strategy
            );
            return Ok(false);
        }

        claims.insert(market.as_str().to_string(), strategy.to_string());
        self.invalidate(market);
        info!("PositionRegistry: {} acquired by {}", market, strategy);
        Ok(true)
    }

    /// Release a claim. Only the owning strategy's claim is removed.
    pub async fn release(&self, market: &Market, strategy: &str) {
        let mut claims = self.claims.lock().await;
        match claims.get(market.as_str()) {
            Some(owner) if owner == strategy => {
                claims.remove(market.as_str());
                info!("PositionRegistry: {} released by {}", market, strategy);
            }
            Some(owner) => {
                debug!(
                    "PositionRegistry: {} release by {} ignored (owned by {})",
                    market, strategy, owner
                );
            }
            None => {}
        }
        drop(claims);
        self.invalidate(market);
    }

    /// Whether any strategy holds an open position for the market, answered
    /// from a short-lived cache backed by the store.
    pub async fn has_open_position(&self, market: &Market) -> Result<bool> {
        {
            let cache = self.open_cache.lock().expect("registry cache poisoned");
            if let Some((value, at)) = cache.get(market.as_str())
                && at.elapsed() < self.cache_ttl
            {
                return Ok(*value);
            }
        }

        let open = !self.positions.find_open_by_market(market).await?.is_empty();
        let claimed = self.claims.lock().await.contains_key(market.as_str());
        let result = open || claimed;

        self.open_cache
            .lock()
            .expect("registry cache poisoned")
            .insert(market.as_str().to_string(), (result, Instant::now()));
        Ok(result)
    }

    pub async fn open_position_count(&self) -> Result<usize> {
        Ok(self.positions.find_open().await?.len())
    }

    pub async fn summary(&self) -> Result<Vec<PositionSummary>> {
        let mut rows: Vec<PositionSummary> = self
            .positions
            .find_open()
            .await?
            .into_iter()
            .map(|p| PositionSummary {
                market: p.market.as_str().to_string(),
                strategy: p.strategy,
                quantity: p.quantity.to_string(),
                entry_price: p.entry_price.to_string(),
            })
            .collect();
        rows.sort_by(|a, b| a.market.cmp(&b.market).then(a.strategy.cmp(&b.strategy)));
        Ok(rows)
    }

    /// Drop the cached answer for a market. Called by every mutating path,
    /// including reconciliation and close recovery after they close positions.
    pub fn invalidate(&self, market: &Market) {
        self.open_cache
            .lock()
            .expect("registry cache poisoned")
            .remove(market.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::Position;
    use crate::infrastructure::persistence::memory::InMemoryPositionRepository;
    use rust_decimal_macros::dec;

    fn market() -> Market {
        Market::parse("KRW-BTC").unwrap()
    }

    fn registry(repo: Arc<InMemoryPositionRepository>) -> PositionRegistry {
        PositionRegistry::new(repo, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let repo = Arc::new(InMemoryPositionRepository::new());
        let reg = registry(repo);
        assert!(reg.try_acquire(&market(), "DCA").await.unwrap());
        assert!(!reg.try_acquire(&market(), "SCALPER").await.unwrap());
        // Same strategy cannot double-acquire either
        assert!(!reg.try_acquire(&market(), "DCA").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let repo = Arc::new(InMemoryPositionRepository::new());
        let reg = registry(repo);
        assert!(reg.try_acquire(&market(), "DCA").await.unwrap());
        reg.release(&market(), "DCA").await;
        assert!(reg.try_acquire(&market(), "SCALPER").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_by_non_owner_is_ignored() {
        let repo = Arc::new(InMemoryPositionRepository::new());
        let reg = registry(repo);
        assert!(reg.try_acquire(&market(), "DCA").await.unwrap());
        reg.release(&market(), "SCALPER").await;
        assert!(!reg.try_acquire(&market(), "SCALPER").await.unwrap());
    }

    #[tokio::test]
    async fn test_persisted_position_blocks_acquire() {
        let repo = Arc::new(InMemoryPositionRepository::new());
        repo.insert(&Position::open(market(), "OTHER_BOT", dec!(1000), dec!(1)))
            .await
            .unwrap();
        let reg = registry(repo);
        assert!(!reg.try_acquire(&market(), "DCA").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let repo = Arc::new(InMemoryPositionRepository::new());
        let reg = Arc::new(registry(repo));
        let mut handles = Vec::new();
        for i in 0..8 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                reg.try_acquire(&Market::parse("KRW-BTC").unwrap(), &format!("S{}", i))
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_open_position_cache_invalidation() {
        let repo = Arc::new(InMemoryPositionRepository::new());
        let reg = registry(Arc::clone(&repo));
        assert!(!reg.has_open_position(&market()).await.unwrap());

        // A mutating operation invalidates the cached negative answer
        assert!(reg.try_acquire(&market(), "DCA").await.unwrap());
        assert!(reg.has_open_position(&market()).await.unwrap());
    }
}
