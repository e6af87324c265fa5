use async_trait::async_trait;

use crate::{Candle, Result};

/// Where candles come from. `BinanceKlines` implements this for live use;
/// tests supply canned series.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// The most recent `limit` candles for `symbol` on `interval`, oldest
    /// first.
    async fn fetch(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;
}
