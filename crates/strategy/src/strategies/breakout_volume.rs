use common::{Candle, Result, Side, SignalProposal, StrategyId};

use super::{highest_high, last_close, lowest_low, proposal, strategy_error, DEFAULT_QUANTITY};
use crate::config::StrategyParams;
use crate::indicators::{atr, volume_ratio};
use crate::Strategy;

/// Close beyond the prior swing high/low on a volume surge.
#[derive(Debug, Clone)]
pub struct BreakoutVolume {
    lookback: usize,
    volume_threshold: f64,
    stop_lookback: usize,
    atr_period: usize,
    tp_atr: f64,
    quantity: f64,
}

impl BreakoutVolume {
    pub fn new(params: &StrategyParams) -> Result<Self> {
        let s = Self {
            lookback: params.usize("lookback", 20),
            volume_threshold: params.f64("volume_threshold", 1.5),
            stop_lookback: params.usize("stop_lookback", 10).max(1),
            atr_period: params.usize("atr_period", 14),
            tp_atr: params.f64("tp_atr", 2.0),
            quantity: params.f64("quantity", DEFAULT_QUANTITY),
        };
        if s.lookback < 2 || s.atr_period == 0 || s.tp_atr <= 0.0 {
            return Err(strategy_error(StrategyId::BreakoutVolume, "invalid lookback or ATR settings"));
        }
        Ok(s)
    }
}

impl Strategy for BreakoutVolume {
    fn id(&self) -> StrategyId {
        StrategyId::BreakoutVolume
    }

    fn evaluate(&self, candles: &[Candle], _higher: Option<&[Candle]>) -> Result<Option<SignalProposal>> {
        if candles.len() < self.lookback.max(self.atr_period).max(20) + 1 {
            return Ok(None);
        }
        let price = last_close(self.id(), candles)?;
        let vr = volume_ratio(candles, 20);
        if vr <= self.volume_threshold {
            return Ok(None);
        }

        let prior = &candles[..candles.len() - 1];
        let resistance = highest_high(prior, self.lookback);
        let support = lowest_low(prior, self.lookback);

        let (side, level) = if price > resistance {
            (Side::Buy, resistance)
        } else if price < support {
            (Side::Sell, support)
        } else {
            return Ok(None);
        };

        let Some(atr) = atr(candles, self.atr_period).filter(|a| *a > 0.0) else {
            return Ok(None);
        };
        let (stop, target) = match side {
            Side::Buy => (lowest_low(candles, self.stop_lookback) * 0.998, price + self.tp_atr * atr),
            Side::Sell => (highest_high(candles, self.stop_lookback) * 1.002, price - self.tp_atr * atr),
        };

        let vol_conf = (vr / 3.0).min(1.0);
        let breakout_conf = ((price - level).abs() / level / 0.01).min(1.0);
        let confidence = (0.4 + (vol_conf + breakout_conf) * 0.25).min(0.9);

        Ok(proposal(self.id(), side, price, stop, target, self.quantity, confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::testing::{candles, flat_then};

    fn strategy() -> BreakoutVolume {
        BreakoutVolume::new(&StrategyParams::default()).unwrap()
    }

    #[test]
    fn breakout_on_volume_spike_buys() {
        let closes = flat_then(40, 100.0, &[103.0]);
        let mut volumes = vec![100.0; 40];
        volumes.push(400.0);
        let p = strategy()
            .evaluate(&candles(&closes, &volumes), None)
            .unwrap()
            .expect("signal");
        assert_eq!(p.side, Side::Buy);
        assert!((p.stop_loss - 99.5 * 0.998).abs() < 1e-9);
        assert!(p.take_profit > p.entry_price);
        assert!((p.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn breakdown_on_volume_spike_sells() {
        let closes = flat_then(40, 100.0, &[97.0]);
        let mut volumes = vec![100.0; 40];
        volumes.push(400.0);
        let p = strategy()
            .evaluate(&candles(&closes, &volumes), None)
            .unwrap()
            .expect("signal");
        assert_eq!(p.side, Side::Sell);
        assert!(p.stop_loss > p.entry_price && p.take_profit < p.entry_price);
    }

    #[test]
    fn breakout_without_volume_is_ignored() {
        let closes = flat_then(40, 100.0, &[103.0]);
        assert!(strategy().evaluate(&candles(&closes, &[]), None).unwrap().is_none());
    }
}
