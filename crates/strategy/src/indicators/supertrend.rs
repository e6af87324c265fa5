use common::Candle;

use super::volatility::atr_series;

/// One Supertrend reading: the active band and the trend direction it implies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupertrendPoint {
    /// Lower band while in an uptrend, upper band while in a downtrend.
    pub band: f64,
    pub uptrend: bool,
}

/// Supertrend over `candles`. Element `j` belongs to candle `j + period - 1`.
pub fn supertrend(candles: &[Candle], period: usize, multiplier: f64) -> Vec<SupertrendPoint> {
    let atrs = atr_series(candles, period);
    if atrs.is_empty() {
        return Vec::new();
    }
    let offset = period - 1;

    let mut out = Vec::with_capacity(atrs.len());
    let mut final_upper = f64::INFINITY;
    let mut final_lower = f64::NEG_INFINITY;
    let mut uptrend = true;

    for (j, &atr) in atrs.iter().enumerate() {
        let i = j + offset;
        let c = &candles[i];
        let hl2 = (c.high + c.low) / 2.0;
        let basic_upper = hl2 + multiplier * atr;
        let basic_lower = hl2 - multiplier * atr;
        let prev_close = if i > 0 { candles[i - 1].close } else { c.close };

        if j == 0 {
            final_upper = basic_upper;
            final_lower = basic_lower;
            uptrend = c.close >= hl2;
        } else {
            final_upper = if basic_upper < final_upper || prev_close > final_upper {
                basic_upper
            } else {
                final_upper
            };
            final_lower = if basic_lower > final_lower || prev_close < final_lower {
                basic_lower
            } else {
                final_lower
            };
            uptrend = if uptrend {
                c.close >= final_lower
            } else {
                c.close > final_upper
            };
        }

        out.push(SupertrendPoint {
            band: if uptrend { final_lower } else { final_upper },
            uptrend,
        });
    }
    out
}
