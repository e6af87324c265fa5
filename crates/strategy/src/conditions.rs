use common::{Candle, MarketConditions, MarketRegime};

use crate::indicators::{atr, bollinger, returns_stdev, sma, volume_ratio};

/// Derives the regime and volatility/trend/volume metrics from a candle series.
/// Stateless: the same series always yields the same result.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketConditionAnalyzer;

impl MarketConditionAnalyzer {
    pub const MIN_CANDLES: usize = 50;
    /// 20-bar return stdev above this is VOLATILE.
    pub const VOLATILE_STDEV: f64 = 0.05;
    /// Bollinger width over price below this is CONSOLIDATION.
    pub const CONSOLIDATION_WIDTH: f64 = 0.02;

    pub fn new() -> Self {
        Self
    }

    /// Never fails: short or degenerate input gives an UNKNOWN regime with
    /// default metrics.
    pub fn analyze(&self, candles: &[Candle]) -> MarketConditions {
        let price = candles.last().map(|c| c.close).unwrap_or(0.0);
        if candles.len() < Self::MIN_CANDLES || !price.is_finite() || price <= 0.0 {
            return MarketConditions::unknown(price.max(0.0));
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let (Some(sma20), Some(sma50)) = (sma(&closes, 20), sma(&closes, 50)) else {
            return MarketConditions::unknown(price);
        };

        let atr = atr(candles, 14).unwrap_or(price * MarketConditions::DEFAULT_VOLATILITY);
        let volatility = atr / price;
        let volume_ratio = volume_ratio(candles, 20);

        // Trend checks take priority over the volatility check.
        let (regime, trend_strength) = if price > sma20 && sma20 > sma50 {
            (MarketRegime::BullishTrending, (price - sma50) / sma50)
        } else if price < sma20 && sma20 < sma50 {
            (MarketRegime::BearishTrending, (sma50 - price) / sma50)
        } else if returns_stdev(&closes, 20).is_some_and(|sd| sd > Self::VOLATILE_STDEV) {
            (MarketRegime::Volatile, 0.0)
        } else if bollinger(&closes, 20, 2.0)
            .is_some_and(|bb| bb.width_ratio(price) < Self::CONSOLIDATION_WIDTH)
        {
            (MarketRegime::Consolidation, 0.0)
        } else {
            (MarketRegime::Sideways, 0.0)
        };

        MarketConditions {
            regime,
            volatility: if volatility.is_finite() { volatility } else { MarketConditions::DEFAULT_VOLATILITY },
            trend_strength,
            volume_ratio,
            current_price: price,
            atr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn series(closes: &[f64], spread: f64) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64),
                open: c,
                high: c * (1.0 + spread),
                low: c * (1.0 - spread),
                close: c,
                volume: 1_000.0,
            })
            .collect()
    }

    #[test]
    fn short_series_is_unknown_with_defaults() {
        let c = series(&[100.0; 49], 0.01);
        let m = MarketConditionAnalyzer::new().analyze(&c);
        assert_eq!(m.regime, MarketRegime::Unknown);
        assert_eq!(m.volatility, 0.02);
        assert_eq!(m.volume_ratio, 1.0);
        assert_eq!(m.current_price, 100.0);
    }

    #[test]
    fn empty_series_does_not_panic() {
        let m = MarketConditionAnalyzer::new().analyze(&[]);
        assert_eq!(m.regime, MarketRegime::Unknown);
    }

    #[test]
    fn rising_series_is_bullish_with_strength() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let m = MarketConditionAnalyzer::new().analyze(&series(&closes, 0.005));
        assert_eq!(m.regime, MarketRegime::BullishTrending);
        let sma50 = closes[30..].iter().sum::<f64>() / 50.0;
        assert!((m.trend_strength - (179.0 - sma50) / sma50).abs() < 1e-12);
    }

    #[test]
    fn falling_series_is_bearish() {
        let closes: Vec<f64> = (0..80).map(|i| 200.0 - i as f64).collect();
        let m = MarketConditionAnalyzer::new().analyze(&series(&closes, 0.005));
        assert_eq!(m.regime, MarketRegime::BearishTrending);
        assert!(m.trend_strength > 0.0);
    }

    #[test]
    fn flat_tight_series_is_consolidation() {
        let m = MarketConditionAnalyzer::new().analyze(&series(&[100.0; 60], 0.002));
        assert_eq!(m.regime, MarketRegime::Consolidation);
        assert!((m.volatility - 0.004).abs() < 1e-9);
    }

    #[test]
    fn wide_chop_without_trend_is_sideways() {
        // ±1.5% alternation: return stdev ~3%, band width well above 2%.
        let closes: Vec<f64> = (0..60).map(|i| if i % 2 == 0 { 98.5 } else { 101.5 }).collect();
        let m = MarketConditionAnalyzer::new().analyze(&series(&closes, 0.01));
        assert_eq!(m.regime, MarketRegime::Sideways);
    }

    #[test]
    fn violent_chop_without_trend_is_volatile() {
        let closes: Vec<f64> = (0..60).map(|i| if i % 2 == 0 { 90.0 } else { 110.0 }).collect();
        let m = MarketConditionAnalyzer::new().analyze(&series(&closes, 0.01));
        assert_eq!(m.regime, MarketRegime::Volatile);
    }

    #[test]
    fn trend_wins_over_volatility_when_both_hold() {
        // Rising trend with ±8% swings: return stdev well above the volatile
        // threshold, yet the SMA ordering classifies it as trending first.
        // Kept as-is; flagged here in case the priority should flip.
        let closes: Vec<f64> = (0..80)
            .map(|i| {
                let base = 100.0 * 1.02f64.powi(i);
                if i % 2 == 0 { base * 1.08 } else { base * 0.92 }
            })
            .collect();
        let c = series(&closes, 0.01);
        let stdev = returns_stdev(&closes, 20).unwrap();
        assert!(stdev > MarketConditionAnalyzer::VOLATILE_STDEV);
        let m = MarketConditionAnalyzer::new().analyze(&c);
        assert!(m.regime.is_trending(), "got {}", m.regime);
    }

    #[test]
    fn analyze_is_idempotent() {
        let closes: Vec<f64> = (0..70).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let c = series(&closes, 0.01);
        let a = MarketConditionAnalyzer::new();
        assert_eq!(a.analyze(&c), a.analyze(&c));
    }

    #[test]
    fn zero_average_volume_gives_unit_ratio() {
        let mut c = series(&[100.0; 60], 0.002);
        for bar in &mut c {
            bar.volume = 0.0;
        }
        assert_eq!(MarketConditionAnalyzer::new().analyze(&c).volume_ratio, 1.0);
    }
}
