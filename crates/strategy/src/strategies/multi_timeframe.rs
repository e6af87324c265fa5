use common::{Candle, Result, Side, SignalProposal, StrategyId};

use super::{closes, last_close, proposal, strategy_error, DEFAULT_QUANTITY};
use crate::config::StrategyParams;
use crate::indicators::{atr, ema_series, RsiIndicator};
use crate::Strategy;

/// Weighted agreement of an EMA crossover bias, filtered by RSI, on the
/// working and the higher timeframe.
#[derive(Debug, Clone)]
pub struct MultiTimeframe {
    fast: usize,
    slow: usize,
    rsi: RsiIndicator,
    primary_weight: f64,
    higher_weight: f64,
    threshold: f64,
    atr_period: usize,
    sl_atr: f64,
    tp_atr: f64,
    quantity: f64,
}

/// Directional strength of one timeframe, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Bias {
    bull: f64,
    bear: f64,
}

impl MultiTimeframe {
    pub fn new(params: &StrategyParams) -> Result<Self> {
        let fast = params.usize("fast", 9);
        let slow = params.usize("slow", 21);
        let rsi_period = params.usize("rsi_period", 14);
        if fast == 0 || fast >= slow || rsi_period < 2 {
            return Err(strategy_error(
                StrategyId::MultiTimeframe,
                format!("invalid periods fast={fast} slow={slow} rsi={rsi_period}"),
            ));
        }
        Ok(Self {
            fast,
            slow,
            rsi: RsiIndicator::new(rsi_period, 70.0, 30.0),
            primary_weight: params.f64("primary_weight", 0.5),
            higher_weight: params.f64("higher_weight", 0.5),
            threshold: params.f64("threshold", 0.6),
            atr_period: params.usize("atr_period", 14).max(1),
            sl_atr: params.f64("sl_atr", 1.5),
            tp_atr: params.f64("tp_atr", 2.0),
            quantity: params.f64("quantity", DEFAULT_QUANTITY),
        })
    }

    fn bias(&self, candles: &[Candle]) -> Option<Bias> {
        if candles.len() < self.slow.max(self.rsi.period) + 1 {
            return None;
        }
        let closes = closes(candles);
        let fast = *ema_series(&closes, self.fast).last()?;
        let slow = *ema_series(&closes, self.slow).last()?;
        let rsi = self.rsi.compute(&closes)?;

        let mut bias = Bias::default();
        if fast > slow {
            bias.bull = if (40.0..=self.rsi.overbought).contains(&rsi) { 1.0 } else { 0.5 };
        } else if fast < slow {
            bias.bear = if (self.rsi.oversold..=60.0).contains(&rsi) { 1.0 } else { 0.5 };
        }
        Some(bias)
    }
}

impl Strategy for MultiTimeframe {
    fn id(&self) -> StrategyId {
        StrategyId::MultiTimeframe
    }

    fn evaluate(&self, candles: &[Candle], higher: Option<&[Candle]>) -> Result<Option<SignalProposal>> {
        let Some(higher) = higher else {
            return Ok(None);
        };
        let (Some(primary), Some(upper)) = (self.bias(candles), self.bias(higher)) else {
            return Ok(None);
        };
        let price = last_close(self.id(), candles)?;

        let buy_score = self.primary_weight * primary.bull + self.higher_weight * upper.bull;
        let sell_score = self.primary_weight * primary.bear + self.higher_weight * upper.bear;
        let (side, score) = if buy_score >= self.threshold && buy_score > sell_score {
            (Side::Buy, buy_score)
        } else if sell_score >= self.threshold && sell_score > buy_score {
            (Side::Sell, sell_score)
        } else {
            return Ok(None);
        };

        let Some(atr) = atr(candles, self.atr_period).filter(|a| *a > 0.0) else {
            return Ok(None);
        };
        let dir = side.direction();
        let stop = price - dir * atr * self.sl_atr;
        let target = price + dir * atr * self.tp_atr;

        Ok(proposal(self.id(), side, price, stop, target, self.quantity, score.min(0.9)))
    }
}
