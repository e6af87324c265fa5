//! Operator-facing text for dispatched signals and risk events.

use common::{MarketConditions, RankedSignal, RiskEvent};

fn price(p: f64) -> String {
    let decimals = match p.abs() {
        a if a >= 100.0 => 2,
        a if a >= 1.0 => 4,
        _ => 6,
    };
    format!("{p:.decimals$}")
}

fn pct_from(entry: f64, level: f64) -> f64 {
    if entry == 0.0 {
        return 0.0;
    }
    (level / entry - 1.0) * 100.0
}

pub fn signal_message(signal: &RankedSignal, conditions: &MarketConditions) -> String {
    let p = &signal.proposal;
    format!(
        "{side} {symbol} ({strategy})\n\
         Entry: {entry}\n\
         Stop loss: {sl} ({sl_pct:+.2}%)\n\
         Take profit: {tp} ({tp_pct:+.2}%)\n\
         R:R 1:{rr:.2}\n\
         Size: {size:.4}\n\
         Confidence: {conf:.0}%\n\
         Market: {regime}, volatility {vol}",
        side = p.side,
        symbol = signal.symbol,
        strategy = p.strategy,
        entry = price(p.entry_price),
        sl = price(p.stop_loss),
        sl_pct = pct_from(p.entry_price, p.stop_loss),
        tp = price(p.take_profit),
        tp_pct = pct_from(p.entry_price, p.take_profit),
        rr = p.reward_risk_ratio(),
        size = p.suggested_size,
        conf = signal.final_confidence * 100.0,
        regime = conditions.regime,
        vol = conditions.volatility_regime(),
    )
}

pub fn event_message(event: &RiskEvent) -> String {
    match event {
        RiskEvent::TakeProfitTriggered { symbol, side, strategy, close_price, profit_pct } => format!(
            "Take profit hit: {side} {symbol} ({strategy}) closed at {}, {profit_pct:+.2}% of balance",
            price(*close_price)
        ),
        RiskEvent::StopLossTriggered { symbol, side, strategy, close_price, profit_pct } => format!(
            "Stop loss hit: {side} {symbol} ({strategy}) closed at {}, {profit_pct:+.2}% of balance",
            price(*close_price)
        ),
        RiskEvent::CircuitBreakerTripped { reason } => {
            format!("Signals halted: {reason}. Send /resetdrawdown to resume.")
        }
        RiskEvent::DrawdownHaltExited => "Signal halt cleared. Engine resuming.".to_string(),
    }
}
