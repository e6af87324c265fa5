use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};

use common::{Candle, Error, MarketDataSource, Notifier, Result, Side, SignalProposal, StrategyId};
use strategy::Strategy;

/// `n` flat 15-minute candles at `price` with a 1% high/low range.
pub fn series(price: f64, n: usize) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| Candle {
            open_time: start + ChronoDuration::minutes(15 * i as i64),
            open: price,
            high: price * 1.005,
            low: price * 0.995,
            close: price,
            volume: 10.0,
        })
        .collect()
}

pub struct FakeSource {
    candles: Mutex<Vec<Candle>>,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            candles: Mutex::new(candles),
            fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn set(&self, candles: Vec<Candle>) {
        *self.candles.lock().unwrap() = candles;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for FakeSource {
    async fn fetch(&self, _symbol: &str, _interval: &str, limit: usize) -> Result<Vec<Candle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Error::Http("connection refused".into()));
        }
        let candles = self.candles.lock().unwrap();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles[skip..].to_vec())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    messages: Mutex<Vec<String>>,
}

impl FakeNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    /// Wait until a delivered message contains `needle`.
    pub async fn wait_for(&self, needle: &str) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(m) = self.messages().into_iter().find(|m| m.contains(needle)) {
                    return m;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timeout")
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, message: &str, _chart: Option<Vec<u8>>) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Buys the last close with a 3% stop and 6% target whenever it has data.
pub struct AlwaysBuy;

impl Strategy for AlwaysBuy {
    fn id(&self) -> StrategyId {
        StrategyId::MultiTimeframe
    }

    fn evaluate(&self, candles: &[Candle], _higher: Option<&[Candle]>) -> Result<Option<SignalProposal>> {
        let Some(last) = candles.last() else {
            return Ok(None);
        };
        Ok(Some(SignalProposal {
            strategy: StrategyId::MultiTimeframe,
            side: Side::Buy,
            entry_price: last.close,
            stop_loss: last.close * 0.97,
            take_profit: last.close * 1.06,
            suggested_size: 0.001,
            confidence: 0.9,
        }))
    }
}

pub fn always_buy() -> Arc<dyn Strategy> {
    Arc::new(AlwaysBuy)
}
