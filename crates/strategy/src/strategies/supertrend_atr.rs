use common::{Candle, Result, Side, SignalProposal, StrategyId};

use super::{last_close, proposal, strategy_error, take_profit_at_rr, DEFAULT_QUANTITY};
use crate::config::StrategyParams;
use crate::indicators::{supertrend, volume_ratio};
use crate::Strategy;

/// Signals on a Supertrend direction flip; the stop sits just beyond the band.
#[derive(Debug, Clone)]
pub struct SupertrendAtr {
    period: usize,
    multiplier: f64,
    rr: f64,
    quantity: f64,
}

impl SupertrendAtr {
    pub fn new(params: &StrategyParams) -> Result<Self> {
        let s = Self {
            period: params.usize("period", 10),
            multiplier: params.f64("multiplier", 3.0),
            rr: params.f64("rr", 2.0),
            quantity: params.f64("quantity", DEFAULT_QUANTITY),
        };
        if s.period < 2 || s.multiplier <= 0.0 || s.rr <= 0.0 {
            return Err(strategy_error(
                StrategyId::SupertrendAtr,
                "period must be >= 2, multiplier and rr positive",
            ));
        }
        Ok(s)
    }
}

impl Strategy for SupertrendAtr {
    fn id(&self) -> StrategyId {
        StrategyId::SupertrendAtr
    }

    fn evaluate(&self, candles: &[Candle], _higher: Option<&[Candle]>) -> Result<Option<SignalProposal>> {
        if candles.len() < self.period + 2 {
            return Ok(None);
        }
        let price = last_close(self.id(), candles)?;
        let st = supertrend(candles, self.period, self.multiplier);
        let [prev, cur] = match st.as_slice() {
            [.., a, b] => [*a, *b],
            _ => return Ok(None),
        };
        if prev.uptrend == cur.uptrend {
            return Ok(None);
        }

        let (side, stop) = if cur.uptrend {
            (Side::Buy, cur.band * 0.99)
        } else {
            (Side::Sell, cur.band * 1.01)
        };
        let target = take_profit_at_rr(side, price, stop, self.rr);

        let mut confidence: f64 = 0.65;
        if volume_ratio(candles, 20) > 1.2 {
            confidence += 0.1;
        }

        Ok(proposal(self.id(), side, price, stop, target, self.quantity, confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::testing::candles;

    fn strategy() -> SupertrendAtr {
        SupertrendAtr::new(&StrategyParams::default()).unwrap()
    }

    #[test]
    fn crash_after_rally_flips_to_sell() {
        let mut closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        closes.extend((0..15).map(|i| 125.0 - i as f64 * 4.0));
        let all = candles(&closes, &[]);
        let s = strategy();

        let found = (12..=all.len())
            .find_map(|n| s.evaluate(&all[..n], None).unwrap())
            .expect("a flip somewhere in the crash");
        assert_eq!(found.side, Side::Sell);
        assert!(found.take_profit < found.entry_price && found.entry_price < found.stop_loss);
    }

    #[test]
    fn steady_trend_does_not_signal() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.5).collect();
        assert!(strategy().evaluate(&candles(&closes, &[]), None).unwrap().is_none());
    }
}
