use common::Candle;

use super::moving_average::sma;

/// True range of `c` given the previous close.
pub fn true_range(prev_close: Option<f64>, c: &Candle) -> f64 {
    let hl = c.high - c.low;
    match prev_close {
        Some(pc) => hl.max((c.high - pc).abs()).max((c.low - pc).abs()),
        None => hl,
    }
}

/// Wilder-smoothed ATR series. Element `j` is the ATR at candle `j + period - 1`.
/// Empty if there are fewer than `period` candles.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period {
        return Vec::new();
    }
    let tr: Vec<f64> = candles
        .iter()
        .enumerate()
        .map(|(i, c)| true_range(i.checked_sub(1).map(|p| candles[p].close), c))
        .collect();

    let p = period as f64;
    let mut out = Vec::with_capacity(tr.len() - period + 1);
    let mut atr = tr[..period].iter().sum::<f64>() / p;
    out.push(atr);
    for &t in &tr[period..] {
        atr = (atr * (p - 1.0) + t) / p;
        out.push(atr);
    }
    out
}

/// Latest ATR value.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    atr_series(candles, period).last().copied()
}

/// Sample standard deviation of the last `window` simple returns.
pub fn returns_stdev(closes: &[f64], window: usize) -> Option<f64> {
    if window < 2 || closes.len() < window + 1 {
        return None;
    }
    let tail = &closes[closes.len() - window - 1..];
    let returns: Vec<f64> = tail
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    sample_stdev(&returns)
}

fn sample_stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Band width relative to `price`.
    pub fn width_ratio(&self, price: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        (self.upper - self.lower) / price
    }
}

/// Bollinger bands over the last `period` closes, `k` standard deviations wide.
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<BollingerBands> {
    let middle = sma(closes, period)?;
    let sd = sample_stdev(&closes[closes.len() - period..])?;
    Some(BollingerBands {
        upper: middle + k * sd,
        middle,
        lower: middle - k * sd,
    })
}
