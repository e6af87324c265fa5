use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::{
    Candle, RankedSignal, RejectionReason, RiskEvent, RiskSettings, Side, StrategyId, TradeOutcome,
};
use strategy::indicators::atr;

use crate::correlation::are_correlated;

/// Smallest and largest position size handed out, in base-asset units.
pub const MIN_POSITION_SIZE: f64 = 0.001;
pub const MAX_POSITION_SIZE: f64 = 0.1;

/// Effective risk per trade never exceeds this percentage of balance.
pub const MAX_EFFECTIVE_RISK_PERCENT: f64 = 2.0;

/// Win-rate sizing only kicks in after this many closed trades.
const MIN_TRADES_FOR_WIN_RATE: u32 = 10;

/// User-configurable risk parameters. Percentages are in percent units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Percent of balance risked per trade before streak/volatility scaling.
    pub max_risk_percent: f64,
    /// Daily P&L (percent) at or below which new signals stop.
    pub max_daily_drawdown: f64,
    /// Drawdown from peak (percent) below which new signals stop.
    pub max_drawdown: f64,
    /// Realized loss amount per day that stops new signals; 0 disables.
    pub max_daily_loss: f64,
    pub max_consecutive_losses: u32,
    /// UTC hours with no new signals.
    pub high_risk_hours: Vec<u32>,
    pub initial_balance: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_percent: 1.0,
            max_daily_drawdown: -5.0,
            max_drawdown: -15.0,
            max_daily_loss: 0.0,
            max_consecutive_losses: 5,
            high_risk_hours: Vec::new(),
            initial_balance: 1000.0,
        }
    }
}

impl From<&RiskSettings> for RiskConfig {
    fn from(s: &RiskSettings) -> Self {
        Self {
            max_risk_percent: s.max_risk_percent,
            max_daily_drawdown: s.max_daily_drawdown,
            max_drawdown: s.max_drawdown,
            max_daily_loss: s.max_daily_loss,
            max_consecutive_losses: s.max_consecutive_losses,
            high_risk_hours: s.high_risk_hours.clone(),
            initial_balance: s.initial_balance,
        }
    }
}

/// Outcome of the risk gate.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved,
    Rejected(RejectionReason),
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskDecision::Approved)
    }
}

/// A dispatched signal tracked until its stop or target is hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivePosition {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub strategy: StrategyId,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub size: f64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    pub strategy: StrategyId,
    pub outcome: TradeOutcome,
    pub profit_pct: f64,
    pub balance_after: f64,
    pub closed_at: DateTime<Utc>,
}

/// Account simulation and breaker inputs. Mutated only through `RiskManager`.
#[derive(Debug, Clone)]
pub struct RiskState {
    pub current_balance: f64,
    /// Historical maximum of `current_balance`; only ever moves up (or is
    /// re-based by an operator reset).
    pub peak_balance: f64,
    /// Sum of today's trade returns, percent.
    pub daily_pnl: f64,
    /// Sum of today's realized losses in quote currency.
    pub daily_loss_amount: f64,
    pub day_marker: NaiveDate,
    pub win_streak: u32,
    pub loss_streak: u32,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub active_positions: Vec<ActivePosition>,
    pub trade_history: Vec<TradeRecord>,
}

impl RiskState {
    fn new(initial_balance: f64, today: NaiveDate) -> Self {
        Self {
            current_balance: initial_balance,
            peak_balance: initial_balance,
            daily_pnl: 0.0,
            daily_loss_amount: 0.0,
            day_marker: today,
            win_streak: 0,
            loss_streak: 0,
            total_trades: 0,
            winning_trades: 0,
            active_positions: Vec::new(),
            trade_history: Vec::new(),
        }
    }

    /// Percent win rate, `None` before the first closed trade.
    pub fn win_rate(&self) -> Option<f64> {
        (self.total_trades > 0).then(|| self.winning_trades as f64 / self.total_trades as f64 * 100.0)
    }
}

/// Read-only view for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSnapshot {
    pub balance: f64,
    pub peak_balance: f64,
    pub drawdown_pct: f64,
    pub daily_pnl: f64,
    pub win_streak: u32,
    pub loss_streak: u32,
    pub total_trades: u32,
    pub win_rate: Option<f64>,
    pub open_positions: usize,
}

/// Layered circuit breaker, position sizer and account simulation.
///
/// Gates are evaluated in a fixed order on every `gate` call: daily reset,
/// daily drawdown, daily loss amount, max drawdown, loss streak, correlated
/// positions, high-risk hours. Approval does not reserve capacity; post-trade
/// bookkeeping happens in `update_after_signal`.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    state: RiskState,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self::new_at(config, Utc::now())
    }

    pub fn new_at(config: RiskConfig, now: DateTime<Utc>) -> Self {
        let state = RiskState::new(config.initial_balance, now.date_naive());
        Self { config, state }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Replace the configuration. Account state is kept.
    pub fn update_config(&mut self, config: RiskConfig) {
        info!(?config, "Risk config updated");
        self.config = config;
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Percent decline of balance from its peak; always ≤ 0.
    pub fn current_drawdown(&self) -> f64 {
        if self.state.peak_balance <= 0.0 {
            return 0.0;
        }
        ((self.state.current_balance / self.state.peak_balance - 1.0) * 100.0).min(0.0)
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        RiskSnapshot {
            balance: self.state.current_balance,
            peak_balance: self.state.peak_balance,
            drawdown_pct: self.current_drawdown(),
            daily_pnl: self.state.daily_pnl,
            win_streak: self.state.win_streak,
            loss_streak: self.state.loss_streak,
            total_trades: self.state.total_trades,
            win_rate: self.state.win_rate(),
            open_positions: self.state.active_positions.len(),
        }
    }

    // ─── Gate ─────────────────────────────────────────────────────────────────

    pub fn can_send_signal(&mut self, signal: &RankedSignal) -> bool {
        self.gate(signal).is_approved()
    }

    pub fn gate(&mut self, signal: &RankedSignal) -> RiskDecision {
        self.gate_at(signal, Utc::now())
    }

    pub fn gate_at(&mut self, signal: &RankedSignal, now: DateTime<Utc>) -> RiskDecision {
        self.roll_day(now);

        match self.first_rejection(signal, now) {
            Some(reason) => {
                self.reject(signal, &reason);
                RiskDecision::Rejected(reason)
            }
            None => RiskDecision::Approved,
        }
    }

    fn first_rejection(&self, signal: &RankedSignal, now: DateTime<Utc>) -> Option<RejectionReason> {
        let s = &self.state;
        let cfg = &self.config;

        if s.daily_pnl <= cfg.max_daily_drawdown {
            return Some(RejectionReason::DailyDrawdown { daily_pnl_pct: s.daily_pnl });
        }
        if cfg.max_daily_loss > 0.0 && s.daily_loss_amount >= cfg.max_daily_loss {
            return Some(RejectionReason::DailyLossLimit { daily_loss: s.daily_loss_amount });
        }
        let drawdown = self.current_drawdown();
        if drawdown < cfg.max_drawdown {
            return Some(RejectionReason::MaxDrawdown { drawdown_pct: drawdown });
        }
        if s.loss_streak >= cfg.max_consecutive_losses {
            return Some(RejectionReason::LossStreak { losses: s.loss_streak });
        }
        if let Some(p) = s
            .active_positions
            .iter()
            .find(|p| p.side == signal.side() && are_correlated(&p.symbol, &signal.symbol))
        {
            return Some(RejectionReason::CorrelatedPosition {
                symbol: p.symbol.clone(),
                side: p.side,
            });
        }
        let hour = now.hour();
        if cfg.high_risk_hours.contains(&hour) {
            return Some(RejectionReason::HighRiskHour { hour });
        }
        None
    }

    fn reject(&self, signal: &RankedSignal, reason: &RejectionReason) {
        if reason.is_circuit_breaker() {
            warn!(
                symbol = %signal.symbol,
                strategy = %signal.strategy(),
                reason = %reason,
                "Signal blocked by circuit breaker"
            );
        } else {
            debug!(
                symbol = %signal.symbol,
                strategy = %signal.strategy(),
                reason = %reason,
                "Signal rejected by RiskManager"
            );
        }
    }

    /// Zero the daily counters once when the UTC date changes.
    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.state.day_marker {
            info!(
                previous = %self.state.day_marker,
                daily_pnl = self.state.daily_pnl,
                "New trading day, daily P&L reset"
            );
            self.state.day_marker = today;
            self.state.daily_pnl = 0.0;
            self.state.daily_loss_amount = 0.0;
        }
    }

    // ─── Sizing ───────────────────────────────────────────────────────────────

    /// Position size in base units for an entry/stop pair, within
    /// [`MIN_POSITION_SIZE`, `MAX_POSITION_SIZE`]. A zero stop distance
    /// returns the minimum.
    pub fn get_position_size(&self, entry: f64, stop_loss: f64, candles: &[Candle]) -> f64 {
        let distance = (entry - stop_loss).abs();
        if !distance.is_finite() || distance == 0.0 || !entry.is_finite() || entry <= 0.0 {
            return MIN_POSITION_SIZE;
        }

        let risk_percent =
            (self.config.max_risk_percent * self.streak_multiplier()).min(MAX_EFFECTIVE_RISK_PERCENT);
        let mut risk_amount = self.state.current_balance * risk_percent / 100.0;

        let volatility = atr(candles, 14).map(|a| a / entry).unwrap_or(0.0);
        risk_amount *= volatility_adjustment(volatility);
        risk_amount *= self.win_rate_adjustment();

        let size = risk_amount / distance;
        if !size.is_finite() {
            return MIN_POSITION_SIZE;
        }
        size.clamp(MIN_POSITION_SIZE, MAX_POSITION_SIZE)
    }

    fn streak_multiplier(&self) -> f64 {
        let s = &self.state;
        if s.win_streak > 1 {
            1.0 + (s.win_streak - 1).min(5) as f64 * 0.1
        } else if s.loss_streak > 1 {
            (1.0 - (s.loss_streak - 1) as f64 * 0.2).max(0.3)
        } else {
            1.0
        }
    }

    fn win_rate_adjustment(&self) -> f64 {
        if self.state.total_trades < MIN_TRADES_FOR_WIN_RATE {
            return 1.0;
        }
        match self.state.win_rate() {
            Some(r) if r > 70.0 => 1.2,
            Some(r) if r > 60.0 => 1.1,
            Some(r) if r < 40.0 => 0.7,
            _ => 1.0,
        }
    }

    // ─── Bookkeeping ──────────────────────────────────────────────────────────

    /// Apply one closed trade. Must be called exactly once per trade.
    pub fn update_after_signal(&mut self, signal: &RankedSignal, outcome: TradeOutcome, profit_pct: f64) {
        self.update_after_signal_at(signal, outcome, profit_pct, Utc::now());
    }

    pub fn update_after_signal_at(
        &mut self,
        signal: &RankedSignal,
        outcome: TradeOutcome,
        profit_pct: f64,
        now: DateTime<Utc>,
    ) {
        self.record_trade(&signal.symbol, signal.side(), signal.strategy(), outcome, profit_pct, now);
    }

    fn record_trade(
        &mut self,
        symbol: &str,
        side: Side,
        strategy: StrategyId,
        outcome: TradeOutcome,
        profit_pct: f64,
        now: DateTime<Utc>,
    ) {
        self.roll_day(now);
        let profit_pct = if profit_pct.is_finite() { profit_pct } else { 0.0 };
        let s = &mut self.state;

        let balance_before = s.current_balance;
        s.current_balance *= 1.0 + profit_pct / 100.0;
        if s.current_balance > s.peak_balance {
            s.peak_balance = s.current_balance;
        }
        s.daily_pnl += profit_pct;
        if profit_pct < 0.0 {
            s.daily_loss_amount += balance_before - s.current_balance;
        }

        s.total_trades += 1;
        match outcome {
            TradeOutcome::Win => {
                s.winning_trades += 1;
                s.win_streak += 1;
                s.loss_streak = 0;
            }
            TradeOutcome::Loss => {
                s.loss_streak += 1;
                s.win_streak = 0;
            }
        }

        s.trade_history.push(TradeRecord {
            symbol: symbol.to_string(),
            side,
            strategy,
            outcome,
            profit_pct,
            balance_after: s.current_balance,
            closed_at: now,
        });

        info!(
            symbol,
            strategy = %strategy,
            outcome = %outcome,
            profit_pct,
            balance = s.current_balance,
            peak = s.peak_balance,
            daily_pnl = s.daily_pnl,
            "Trade result recorded"
        );
    }

    /// Operator reset: clears the loss streak and re-bases the drawdown peak
    /// on the current balance.
    pub fn reset_drawdown(&mut self) -> RiskEvent {
        let s = &mut self.state;
        s.peak_balance = s.current_balance;
        s.loss_streak = 0;
        s.daily_pnl = s.daily_pnl.max(0.0);
        s.daily_loss_amount = 0.0;
        info!(balance = s.current_balance, "Drawdown reset by operator");
        RiskEvent::DrawdownHaltExited
    }

    // ─── Virtual positions ────────────────────────────────────────────────────

    /// Track a dispatched signal until its stop or target is hit.
    pub fn open_position(&mut self, signal: &RankedSignal, size: f64) -> Uuid {
        let p = &signal.proposal;
        let position = ActivePosition {
            id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            side: p.side,
            strategy: p.strategy,
            entry_price: p.entry_price,
            stop_loss: p.stop_loss,
            take_profit: p.take_profit,
            size,
            opened_at: signal.timestamp,
        };
        info!(
            symbol = %position.symbol,
            side = %position.side,
            id = %position.id,
            entry = position.entry_price,
            size,
            "Virtual position opened"
        );
        let id = position.id;
        self.state.active_positions.push(position);
        id
    }

    pub fn check_exits(&mut self, symbol: &str, price: f64) -> Vec<RiskEvent> {
        self.check_exits_at(symbol, price, Utc::now())
    }

    /// Close every open position on `symbol` whose stop or target `price` has
    /// reached, record the result, and report it.
    pub fn check_exits_at(&mut self, symbol: &str, price: f64, now: DateTime<Utc>) -> Vec<RiskEvent> {
        if !price.is_finite() || price <= 0.0 {
            return Vec::new();
        }
        let (hit, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.state.active_positions)
            .into_iter()
            .partition(|p| p.symbol == symbol && exit_outcome(p, price).is_some());
        self.state.active_positions = open;

        let mut events = Vec::with_capacity(hit.len());
        for position in hit {
            let Some(outcome) = exit_outcome(&position, price) else {
                continue;
            };
            let balance = self.state.current_balance;
            let profit_pct = if balance > 0.0 {
                position.size * (price - position.entry_price) * position.side.direction() / balance * 100.0
            } else {
                0.0
            };
            self.record_trade(&position.symbol, position.side, position.strategy, outcome, profit_pct, now);
            info!(
                symbol = %position.symbol,
                id = %position.id,
                outcome = %outcome,
                close_price = price,
                "Virtual position closed"
            );

            events.push(match outcome {
                TradeOutcome::Win => RiskEvent::TakeProfitTriggered {
                    symbol: position.symbol,
                    side: position.side,
                    strategy: position.strategy,
                    close_price: price,
                    profit_pct,
                },
                TradeOutcome::Loss => RiskEvent::StopLossTriggered {
                    symbol: position.symbol,
                    side: position.side,
                    strategy: position.strategy,
                    close_price: price,
                    profit_pct,
                },
            });
        }
        events
    }
}

fn exit_outcome(p: &ActivePosition, price: f64) -> Option<TradeOutcome> {
    match p.side {
        Side::Buy if price >= p.take_profit => Some(TradeOutcome::Win),
        Side::Buy if price <= p.stop_loss => Some(TradeOutcome::Loss),
        Side::Sell if price <= p.take_profit => Some(TradeOutcome::Win),
        Side::Sell if price >= p.stop_loss => Some(TradeOutcome::Loss),
        _ => None,
    }
}

/// Shrink risk when ATR/price is above 5%, grow it (up to 1.2×) below 1%.
fn volatility_adjustment(volatility: f64) -> f64 {
    if !volatility.is_finite() {
        1.0
    } else if volatility > 0.05 {
        (0.05 / volatility).max(0.5)
    } else if volatility > 0.0 && volatility < 0.01 {
        (0.01 / volatility).min(1.2)
    } else {
        1.0
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
