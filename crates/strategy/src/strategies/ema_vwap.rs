use common::{Candle, Result, Side, SignalProposal, StrategyId};

use super::{
    closes, highest_high, last_close, lowest_low, proposal, take_profit_at_rr, DEFAULT_QUANTITY,
};
use crate::config::StrategyParams;
use crate::indicators::{ema_series, volume_ratio, vwap_series};
use crate::Strategy;

/// Close crossing the EMA, confirmed by being on the same side of VWAP.
#[derive(Debug, Clone)]
pub struct EmaVwap {
    ema_period: usize,
    stop_lookback: usize,
    rr: f64,
    quantity: f64,
}

impl EmaVwap {
    const VOLUME_PERIOD: usize = 20;

    pub fn new(params: &StrategyParams) -> Result<Self> {
        let s = Self {
            ema_period: params.usize("ema_period", 20),
            stop_lookback: params.usize("stop_lookback", 10).max(1),
            rr: params.f64("rr", 2.0),
            quantity: params.f64("quantity", DEFAULT_QUANTITY),
        };
        if s.ema_period < 2 || s.rr <= 0.0 {
            return Err(super::strategy_error(
                StrategyId::EmaVwap,
                "ema_period must be >= 2 and rr positive",
            ));
        }
        Ok(s)
    }
}

impl Strategy for EmaVwap {
    fn id(&self) -> StrategyId {
        StrategyId::EmaVwap
    }

    fn evaluate(&self, candles: &[Candle], _higher: Option<&[Candle]>) -> Result<Option<SignalProposal>> {
        if candles.len() < self.ema_period.max(Self::VOLUME_PERIOD) + 1 {
            return Ok(None);
        }
        let price = last_close(self.id(), candles)?;
        let closes = closes(candles);
        let ema = ema_series(&closes, self.ema_period);
        let vwap = vwap_series(candles);
        let n = closes.len();

        let (prev_close, prev_ema) = (closes[n - 2], ema[n - 2]);
        let (cur_ema, cur_vwap) = (ema[n - 1], vwap[n - 1]);

        let side = if prev_close <= prev_ema && price > cur_ema && price > cur_vwap {
            Side::Buy
        } else if prev_close >= prev_ema && price < cur_ema && price < cur_vwap {
            Side::Sell
        } else {
            return Ok(None);
        };

        let stop = match side {
            Side::Buy => lowest_low(candles, self.stop_lookback) * 0.99,
            Side::Sell => highest_high(candles, self.stop_lookback) * 1.01,
        };
        let target = take_profit_at_rr(side, price, stop, self.rr);

        let mut confidence: f64 = 0.6;
        if (cur_ema - cur_vwap) * side.direction() > 0.0 {
            confidence += 0.1;
        }
        if volume_ratio(candles, Self::VOLUME_PERIOD) > 1.2 {
            confidence += 0.1;
        }

        Ok(proposal(
            self.id(),
            side,
            price,
            stop,
            target,
            self.quantity,
            confidence.min(0.9),
        ))
    }
}
