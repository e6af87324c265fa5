use common::{Candle, Result, Side, SignalProposal, StrategyId};

use super::{closes, last_close, proposal, strategy_error, DEFAULT_QUANTITY};
use crate::config::StrategyParams;
use crate::indicators::{atr, ema_series, volume_ratio, MacdIndicator, MacdSignal};
use crate::Strategy;

/// MACD crossover in the direction of the long EMA, on above-average volume.
#[derive(Debug, Clone)]
pub struct TrendMomentum {
    ema_period: usize,
    macd: MacdIndicator,
    volume_threshold: f64,
    atr_period: usize,
    sl_atr: f64,
    tp_atr: f64,
    quantity: f64,
}

impl TrendMomentum {
    pub fn new(params: &StrategyParams) -> Result<Self> {
        let fast = params.usize("fast", 12);
        let slow = params.usize("slow", 26);
        let signal = params.usize("signal", 9);
        if fast == 0 || signal == 0 || fast >= slow {
            return Err(strategy_error(
                StrategyId::TrendMomentum,
                format!("invalid MACD periods {fast}/{slow}/{signal}"),
            ));
        }
        let s = Self {
            ema_period: params.usize("ema_period", 50),
            macd: MacdIndicator::new(fast, slow, signal),
            volume_threshold: params.f64("volume_threshold", 1.2),
            atr_period: params.usize("atr_period", 14),
            sl_atr: params.f64("sl_atr", 1.5),
            tp_atr: params.f64("tp_atr", 2.0),
            quantity: params.f64("quantity", DEFAULT_QUANTITY),
        };
        if s.ema_period < 2 || s.atr_period == 0 || s.sl_atr <= 0.0 || s.tp_atr <= 0.0 {
            return Err(strategy_error(StrategyId::TrendMomentum, "invalid EMA or ATR settings"));
        }
        Ok(s)
    }

    fn min_candles(&self) -> usize {
        self.ema_period
            .max(self.macd.slow + self.macd.signal)
            .max(self.atr_period)
            + 1
    }
}

impl Strategy for TrendMomentum {
    fn id(&self) -> StrategyId {
        StrategyId::TrendMomentum
    }

    fn evaluate(&self, candles: &[Candle], _higher: Option<&[Candle]>) -> Result<Option<SignalProposal>> {
        if candles.len() < self.min_candles() {
            return Ok(None);
        }
        let price = last_close(self.id(), candles)?;
        let closes = closes(candles);
        let ema = ema_series(&closes, self.ema_period)[closes.len() - 1];
        let vr = volume_ratio(candles, 20);
        if vr <= self.volume_threshold {
            return Ok(None);
        }

        let side = match self.macd.compute(&closes) {
            Some(MacdSignal::Bullish) if price > ema => Side::Buy,
            Some(MacdSignal::Bearish) if price < ema => Side::Sell,
            _ => return Ok(None),
        };

        let Some(atr) = atr(candles, self.atr_period).filter(|a| *a > 0.0) else {
            return Ok(None);
        };
        let dir = side.direction();
        let stop = price - dir * atr * self.sl_atr;
        let target = price + dir * atr * self.tp_atr;

        let vol_conf = (vr - 1.0).clamp(0.0, 1.0);
        let mom_conf = ((price - ema).abs() / ema / 0.02).min(1.0);
        let confidence = (0.5 + (vol_conf + mom_conf) * 0.2).min(0.9);

        Ok(proposal(self.id(), side, price, stop, target, self.quantity, confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::testing::candles;

    fn strategy() -> TrendMomentum {
        TrendMomentum::new(&StrategyParams::default()).unwrap()
    }

    #[test]
    fn pullback_in_uptrend_then_resumption_buys_on_volume() {
        let mut closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        closes.extend([157.5, 156.0, 154.5, 153.0]);
        let mut volumes = vec![100.0; closes.len()];
        for i in 0..12 {
            closes.push(155.0 + i as f64 * 2.0);
            volumes.push(300.0);
        }
        let all = candles(&closes, &volumes);
        let s = strategy();

        let found = (64..=all.len())
            .find_map(|n| s.evaluate(&all[..n], None).unwrap())
            .expect("bullish cross after the pullback");
        assert_eq!(found.side, Side::Buy);
        assert!(found.stop_loss < found.entry_price && found.entry_price < found.take_profit);
        assert!(found.confidence <= 0.9);
    }

    #[test]
    fn no_signal_without_volume() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i % 7) as f64).collect();
        assert!(strategy().evaluate(&candles(&closes, &[]), None).unwrap().is_none());
    }

    #[test]
    fn rejects_inverted_macd_periods() {
        let mut m = std::collections::HashMap::new();
        m.insert("fast".to_string(), toml::Value::Integer(30));
        assert!(TrendMomentum::new(&StrategyParams::new(m)).is_err());
    }
}
