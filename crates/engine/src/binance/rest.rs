use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use common::{Candle, Error, MarketDataSource, Result};

/// Binance caps a single klines request at this many rows.
const MAX_PAGE: usize = 1000;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Public (unsigned) klines endpoint client. Every request has a timeout and
/// transient failures are retried with exponential backoff.
pub struct BinanceKlines {
    base_url: Url,
    http: Client,
    retries: u32,
    initial_backoff: Duration,
}

impl BinanceKlines {
    pub fn new(base_url: &str, timeout: Duration, retries: u32) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| Error::Config(format!("invalid Binance base URL '{base_url}': {e}")))?;
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url,
            http,
            retries,
            initial_backoff: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay. Later delays double up to 30s.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    fn klines_url(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Url> {
        let mut url = self
            .base_url
            .join("/api/v3/klines")
            .map_err(|e| Error::Config(e.to_string()))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("symbol", &symbol.to_uppercase());
            q.append_pair("interval", interval);
            q.append_pair("limit", &limit.clamp(1, MAX_PAGE).to_string());
            if let Some(start) = start {
                q.append_pair("startTime", &start.timestamp_millis().to_string());
            }
            if let Some(end) = end {
                q.append_pair("endTime", &end.timestamp_millis().to_string());
            }
        }
        Ok(url)
    }

    async fn get_once(&self, url: &Url) -> Result<Vec<Candle>> {
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(Error::Http(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            return Err(Error::DataSource(format!("HTTP {status}: {body}")));
        }
        parse_klines(&body)
    }

    /// GET with retry. Transport errors, 429 and 5xx are retried; any other
    /// failure is returned immediately.
    async fn get_with_retry(&self, url: &Url) -> Result<Vec<Candle>> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;
        loop {
            match self.get_once(url).await {
                Ok(candles) => return Ok(candles),
                Err(Error::Http(e)) if attempt < self.retries => {
                    attempt += 1;
                    warn!(url = %url, error = %e, attempt, backoff = ?backoff, "Kline request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Every candle opening in `[start, end)`, fetched page by page.
    pub async fn fetch_history(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let step = interval_duration(interval)?;
        let mut candles: Vec<Candle> = Vec::new();
        let mut cursor = start;

        while cursor < end {
            let url = self.klines_url(symbol, interval, MAX_PAGE, Some(cursor), Some(end))?;
            let page = self.get_with_retry(&url).await?;
            let full = page.len() >= MAX_PAGE;
            let Some(last) = page.last().map(|c| c.open_time) else {
                break;
            };
            for c in page {
                let newer = candles.last().map_or(true, |prev| c.open_time > prev.open_time);
                if newer && c.open_time < end {
                    candles.push(c);
                }
            }
            debug!(symbol, interval, total = candles.len(), "Fetched kline page");
            if !full {
                break;
            }
            cursor = last + step;
        }
        Ok(candles)
    }
}

#[async_trait]
impl MarketDataSource for BinanceKlines {
    async fn fetch(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let url = self.klines_url(symbol, interval, limit, None, None)?;
        self.get_with_retry(&url).await
    }
}

// ─── Kline JSON parsing ──────────────────────────────────────────────────────

/// `[openTime, open, high, low, close, volume, closeTime, quoteVolume,
/// trades, takerBase, takerQuote, ignore]`
#[derive(Deserialize)]
struct KlineRow(
    i64,
    String,
    String,
    String,
    String,
    String,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
);

fn price(field: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|e| Error::DataSource(format!("bad kline {field} '{raw}': {e}")))
}

/// Parse a klines response body into candles, oldest first.
pub fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<KlineRow> = serde_json::from_str(body)?;
    rows.into_iter()
        .map(|KlineRow(open_ms, o, h, l, c, v, ..)| {
            let open_time = Utc
                .timestamp_millis_opt(open_ms)
                .single()
                .ok_or_else(|| Error::DataSource(format!("bad kline open time {open_ms}")))?;
            Ok(Candle {
                open_time,
                open: price("open", &o)?,
                high: price("high", &h)?,
                low: price("low", &l)?,
                close: price("close", &c)?,
                volume: price("volume", &v)?,
            })
        })
        .collect()
}

/// Length of one bar for a Binance interval string such as `15m` or `4h`.
///
/// `M` (month) maps to 28 days, the shortest month, so stepping a history
/// cursor by it never skips a bar; overlapping pages are deduplicated.
pub fn interval_duration(interval: &str) -> Result<chrono::Duration> {
    let bad = || Error::Config(format!("unsupported interval '{interval}'"));
    let split = interval.len().checked_sub(1).ok_or_else(bad)?;
    let (n, unit) = interval.split_at(split);
    let n: i64 = n.parse().map_err(|_| bad())?;
    if n <= 0 {
        return Err(bad());
    }
    match unit {
        "s" => Ok(chrono::Duration::seconds(n)),
        "m" => Ok(chrono::Duration::minutes(n)),
        "h" => Ok(chrono::Duration::hours(n)),
        "d" => Ok(chrono::Duration::days(n)),
        "w" => Ok(chrono::Duration::weeks(n)),
        "M" => Ok(chrono::Duration::days(28 * n)),
        _ => Err(bad()),
    }
}
