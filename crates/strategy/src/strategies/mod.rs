//! Concrete strategy adapters. Each one is a pure function of the candle
//! slices it is handed and keeps its derived indicator columns local.

mod bollinger_bounce;
mod breakout_volume;
mod ema_vwap;
mod multi_timeframe;
mod supertrend_atr;
mod trend_momentum;

pub use bollinger_bounce::BollingerBounce;
pub use breakout_volume::BreakoutVolume;
pub use ema_vwap::EmaVwap;
pub use multi_timeframe::MultiTimeframe;
pub use supertrend_atr::SupertrendAtr;
pub use trend_momentum::TrendMomentum;

use common::{Candle, Error, Result, Side, SignalProposal, StrategyId};

pub(crate) const DEFAULT_QUANTITY: f64 = 0.001;

pub(crate) fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Lowest low of the last `n` candles.
pub(crate) fn lowest_low(candles: &[Candle], n: usize) -> f64 {
    let start = candles.len().saturating_sub(n);
    candles[start..].iter().map(|c| c.low).fold(f64::INFINITY, f64::min)
}

/// Highest high of the last `n` candles.
pub(crate) fn highest_high(candles: &[Candle], n: usize) -> f64 {
    let start = candles.len().saturating_sub(n);
    candles[start..].iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max)
}

/// Latest close, rejecting corrupt data.
pub(crate) fn last_close(id: StrategyId, candles: &[Candle]) -> Result<f64> {
    let price = candles
        .last()
        .map(|c| c.close)
        .ok_or_else(|| strategy_error(id, "empty candle series"))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(strategy_error(id, format!("invalid close price {price}")));
    }
    Ok(price)
}

pub(crate) fn strategy_error(id: StrategyId, message: impl Into<String>) -> Error {
    Error::Strategy {
        strategy: id.to_string(),
        message: message.into(),
    }
}

/// Take profit `rr` stop-distances away from entry, on the profitable side.
pub(crate) fn take_profit_at_rr(side: Side, entry: f64, stop: f64, rr: f64) -> f64 {
    entry + side.direction() * (entry - stop).abs() * rr
}

/// Assemble a proposal, or `None` if the prices do not bracket entry correctly.
pub(crate) fn proposal(
    strategy: StrategyId,
    side: Side,
    entry_price: f64,
    stop_loss: f64,
    take_profit: f64,
    suggested_size: f64,
    confidence: f64,
) -> Option<SignalProposal> {
    let p = SignalProposal {
        strategy,
        side,
        entry_price,
        stop_loss,
        take_profit,
        suggested_size,
        confidence: confidence.clamp(0.0, 1.0),
    };
    p.is_well_formed().then_some(p)
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{Duration, TimeZone, Utc};
    use common::Candle;

    /// Candles with a fixed 1% high/low spread around each close.
    pub fn candles(closes: &[f64], volumes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + Duration::minutes(15 * i as i64),
                open: c,
                high: c * 1.005,
                low: c * 0.995,
                close: c,
                volume: volumes.get(i).copied().unwrap_or(100.0),
            })
            .collect()
    }

    pub fn flat_then(n_flat: usize, level: f64, tail: &[f64]) -> Vec<f64> {
        let mut v = vec![level; n_flat];
        v.extend_from_slice(tail);
        v
    }
}
