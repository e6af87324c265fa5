use common::{Candle, Result, Side, SignalProposal, StrategyId};

use super::{closes, last_close, proposal, strategy_error, take_profit_at_rr, DEFAULT_QUANTITY};
use crate::config::StrategyParams;
use crate::indicators::{atr, bollinger, RsiIndicator};
use crate::Strategy;

/// Mean reversion: a wick through the outer band that closes back inside,
/// with RSI stretched the same way. Targets the middle band.
#[derive(Debug, Clone)]
pub struct BollingerBounce {
    period: usize,
    std_dev: f64,
    rsi: RsiIndicator,
    atr_period: usize,
    rr: f64,
    quantity: f64,
}

impl BollingerBounce {
    pub fn new(params: &StrategyParams) -> Result<Self> {
        let period = params.usize("period", 20);
        let rsi_period = params.usize("rsi_period", 14);
        if period < 2 || rsi_period < 2 {
            return Err(strategy_error(StrategyId::BollingerBounce, "periods must be >= 2"));
        }
        Ok(Self {
            period,
            std_dev: params.f64("std_dev", 2.0),
            rsi: RsiIndicator::new(
                rsi_period,
                params.f64("rsi_sell", 55.0),
                params.f64("rsi_buy", 45.0),
            ),
            atr_period: params.usize("atr_period", 14).max(1),
            rr: params.f64("rr", 1.5),
            quantity: params.f64("quantity", DEFAULT_QUANTITY),
        })
    }
}

impl Strategy for BollingerBounce {
    fn id(&self) -> StrategyId {
        StrategyId::BollingerBounce
    }

    fn evaluate(&self, candles: &[Candle], _higher: Option<&[Candle]>) -> Result<Option<SignalProposal>> {
        if candles.len() < self.period.max(self.rsi.period).max(self.atr_period) + 1 {
            return Ok(None);
        }
        let price = last_close(self.id(), candles)?;
        let last = candles[candles.len() - 1];
        let closes = closes(candles);
        let (Some(bands), Some(rsi), Some(atr)) = (
            bollinger(&closes, self.period, self.std_dev),
            self.rsi.compute(&closes),
            atr(candles, self.atr_period),
        ) else {
            return Ok(None);
        };

        let (side, stop, stretch) = if last.low <= bands.lower && price > bands.lower && rsi < self.rsi.oversold {
            (Side::Buy, last.low - 0.5 * atr, (self.rsi.oversold - rsi) / self.rsi.oversold)
        } else if last.high >= bands.upper && price < bands.upper && rsi > self.rsi.overbought {
            (
                Side::Sell,
                last.high + 0.5 * atr,
                (rsi - self.rsi.overbought) / (100.0 - self.rsi.overbought),
            )
        } else {
            return Ok(None);
        };

        let target = if (bands.middle - price) * side.direction() > 0.0 {
            bands.middle
        } else {
            take_profit_at_rr(side, price, stop, self.rr)
        };
        let confidence = (0.55 + stretch * 0.5).min(0.9);

        Ok(proposal(self.id(), side, price, stop, target, self.quantity, confidence))
    }
}
