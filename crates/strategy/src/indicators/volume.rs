use common::Candle;

/// Current volume over the mean volume of the last `period` candles
/// (current included). Falls back to 1.0 when the average is zero or the
/// series is too short.
pub fn volume_ratio(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period {
        return 1.0;
    }
    let window = &candles[candles.len() - period..];
    let avg = window.iter().map(|c| c.volume).sum::<f64>() / period as f64;
    let current = window[window.len() - 1].volume;
    if avg <= 0.0 || !avg.is_finite() {
        return 1.0;
    }
    current / avg
}

/// Cumulative volume-weighted average of the typical price, one value per candle.
pub fn vwap_series(candles: &[Candle]) -> Vec<f64> {
    let mut pv = 0.0;
    let mut vol = 0.0;
    candles
        .iter()
        .map(|c| {
            let typical = (c.high + c.low + c.close) / 3.0;
            pv += typical * c.volume;
            vol += c.volume;
            if vol > 0.0 { pv / vol } else { typical }
        })
        .collect()
}
