use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use common::{Candle, MarketDataSource};

struct CacheEntry {
    candles: Arc<[Candle]>,
    limit: usize,
    fetched_at: Instant,
}

/// Time-bounded candle cache keyed by (symbol, interval).
///
/// Consumers get a shared immutable snapshot. A refresh swaps in a new
/// snapshot for the key; an in-flight reader keeps the series it already
/// holds.
pub struct MarketDataCache {
    source: Arc<dyn MarketDataSource>,
    ttl: Duration,
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl MarketDataCache {
    pub fn new(source: Arc<dyn MarketDataSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Candles for the key, fetched when missing, stale (age ≥ TTL) or cached
    /// with a smaller limit. `None` on a fetch failure or an unusable series;
    /// the failure is logged and never propagated.
    pub async fn get(&self, symbol: &str, interval: &str, limit: usize) -> Option<Arc<[Candle]>> {
        let key = (symbol.to_string(), interval.to_string());
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl && entry.limit >= limit {
                    debug!(symbol, interval, "Candle cache hit");
                    return Some(Arc::clone(&entry.candles));
                }
            }
        }

        let candles = match self.source.fetch(symbol, interval, limit).await {
            Ok(c) => c,
            Err(e) => {
                warn!(symbol, interval, error = %e, "Candle fetch failed");
                return None;
            }
        };
        if candles.is_empty() {
            warn!(symbol, interval, "Candle source returned no data");
            return None;
        }
        if !candles.windows(2).all(|w| w[0].open_time < w[1].open_time) {
            warn!(symbol, interval, "Candle series is not strictly increasing in time, discarding");
            return None;
        }

        let candles: Arc<[Candle]> = candles.into();
        self.entries.write().await.insert(
            key,
            CacheEntry {
                candles: Arc::clone(&candles),
                limit,
                fetched_at: Instant::now(),
            },
        );
        debug!(symbol, interval, len = candles.len(), "Candle cache refreshed");
        Some(candles)
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
