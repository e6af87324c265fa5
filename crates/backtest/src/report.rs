use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{Result, Side, StrategyId, TradeOutcome, VolatilityRegime};

const TRADING_DAYS: f64 = 252.0;
const RISK_FREE_RATE: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    /// Still open at the final bar.
    EndOfData,
}

/// One closed simulated trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub strategy: StrategyId,
    pub side: Side,
    pub confidence: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub quantity: f64,
    /// Net of entry and exit fees, in quote currency.
    pub profit: f64,
    /// `profit` as a percent of the balance before the trade.
    pub profit_pct: f64,
    pub balance_after: f64,
    pub outcome: TradeOutcome,
    pub exit_reason: ExitReason,
    pub volatility_regime: VolatilityRegime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// High win rate, high profit and a deep drawdown together.
    Overfit,
    Poor,
    Good,
    Moderate,
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quality::Overfit => write!(f, "WARNING: potential overfitting"),
            Quality::Poor => write!(f, "poor performance"),
            Quality::Good => write!(f, "good risk-adjusted performance"),
            Quality::Moderate => write!(f, "moderate performance"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_profit: f64,
    pub profit_pct: f64,
    pub avg_profit_per_trade: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// Percent, ≤ 0.
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Gross wins over gross losses; `None` without a losing trade.
    pub profit_factor: Option<f64>,
    /// Net profit over the sum of absolute trade results.
    pub risk_reward_ratio: f64,
    pub failed_executions: usize,
    pub strategies: BTreeMap<StrategyId, StrategyStats>,
    pub volatility_regimes: BTreeMap<VolatilityRegime, usize>,
    pub quality: Quality,
    pub trades: Vec<Trade>,
}

impl BacktestReport {
    pub fn from_trades(symbol: &str, initial_balance: f64, trades: Vec<Trade>, failed_executions: usize) -> Self {
        let total_trades = trades.len();
        let wins = trades.iter().filter(|t| t.outcome == TradeOutcome::Win).count();
        let losses = total_trades - wins;
        let profits: Vec<f64> = trades.iter().map(|t| t.profit).collect();
        let total_profit: f64 = profits.iter().sum();

        let gross_win: f64 = profits.iter().filter(|p| **p > 0.0).sum();
        let gross_loss: f64 = profits.iter().filter(|p| **p <= 0.0).sum();
        let avg = |sum: f64, n: usize| if n > 0 { sum / n as f64 } else { 0.0 };

        let mut balances = vec![initial_balance];
        balances.extend(trades.iter().map(|t| t.balance_after));

        let returns: Vec<f64> = profits.iter().map(|p| p / initial_balance).collect();
        let total_abs: f64 = profits.iter().map(|p| p.abs()).sum();

        let mut strategies: BTreeMap<StrategyId, StrategyStats> = BTreeMap::new();
        let mut volatility_regimes: BTreeMap<VolatilityRegime, usize> = BTreeMap::new();
        for t in &trades {
            let s = strategies.entry(t.strategy).or_default();
            s.trades += 1;
            s.profit += t.profit;
            if t.outcome == TradeOutcome::Win {
                s.wins += 1;
            }
            *volatility_regimes.entry(t.volatility_regime).or_default() += 1;
        }
        for s in strategies.values_mut() {
            s.win_rate = s.wins as f64 / s.trades as f64 * 100.0;
        }

        let win_rate = avg(wins as f64, total_trades) * 100.0;
        let profit_pct = total_profit / initial_balance * 100.0;
        let max_drawdown = max_drawdown(&balances);
        let sharpe_ratio = sharpe(&returns);

        Self {
            symbol: symbol.to_string(),
            initial_balance,
            final_balance: balances.last().copied().unwrap_or(initial_balance),
            total_trades,
            wins,
            losses,
            win_rate,
            total_profit,
            profit_pct,
            avg_profit_per_trade: avg(total_profit, total_trades),
            avg_win: avg(gross_win, wins),
            avg_loss: avg(gross_loss, losses),
            max_drawdown,
            sharpe_ratio,
            sortino_ratio: sortino(&returns),
            profit_factor: (gross_loss < 0.0).then(|| gross_win / gross_loss.abs()),
            risk_reward_ratio: if total_abs > 0.0 { total_profit / total_abs } else { 0.0 },
            failed_executions,
            strategies,
            volatility_regimes,
            quality: assess(win_rate, profit_pct, max_drawdown, sharpe_ratio),
            trades,
        }
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl std::fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Backtest report: {}", self.symbol)?;
        writeln!(f, "  Trades:          {} ({} wins / {} losses)", self.total_trades, self.wins, self.losses)?;
        writeln!(f, "  Win rate:        {:.2}%", self.win_rate)?;
        writeln!(f, "  Profit:          {:+.2} ({:+.2}%)", self.total_profit, self.profit_pct)?;
        writeln!(f, "  Final balance:   {:.2}", self.final_balance)?;
        writeln!(f, "  Max drawdown:    {:.2}%", self.max_drawdown)?;
        writeln!(f, "  Sharpe/Sortino:  {:.2} / {:.2}", self.sharpe_ratio, self.sortino_ratio)?;
        match self.profit_factor {
            Some(pf) => writeln!(f, "  Profit factor:   {pf:.2}")?,
            None => writeln!(f, "  Profit factor:   n/a (no losing trades)")?,
        }
        writeln!(f, "  Risk/reward:     {:.2}", self.risk_reward_ratio)?;
        writeln!(f, "  Avg win/loss:    {:+.2} / {:+.2}", self.avg_win, self.avg_loss)?;
        writeln!(f, "  Failed fills:    {}", self.failed_executions)?;
        for (id, s) in &self.strategies {
            writeln!(f, "  {id}: {} trades, {:.1}% win rate, {:+.2} profit", s.trades, s.win_rate, s.profit)?;
        }
        for (regime, n) in &self.volatility_regimes {
            writeln!(f, "  {regime} volatility: {n} trades")?;
        }
        write!(f, "  Assessment:      {}", self.quality)
    }
}

/// Deepest peak-to-trough decline of the balance curve, in percent.
pub fn max_drawdown(balances: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst: f64 = 0.0;
    for &b in balances {
        peak = peak.max(b);
        if peak > 0.0 {
            worst = worst.min((b - peak) / peak * 100.0);
        }
    }
    worst
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sample_stdev(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    Some(var.sqrt())
}

fn excess(returns: &[f64]) -> Vec<f64> {
    returns.iter().map(|r| r - RISK_FREE_RATE / TRADING_DAYS).collect()
}

/// Annualized (√252) Sharpe ratio of per-trade returns; 0 when undefined.
pub fn sharpe(returns: &[f64]) -> f64 {
    let ex = excess(returns);
    match sample_stdev(&ex) {
        Some(sd) if sd > 0.0 => TRADING_DAYS.sqrt() * mean(&ex) / sd,
        _ => 0.0,
    }
}

/// Like [`sharpe`] but only penalizes downside deviation.
pub fn sortino(returns: &[f64]) -> f64 {
    let ex = excess(returns);
    let downside: Vec<f64> = ex.iter().copied().filter(|r| *r < 0.0).collect();
    match sample_stdev(&downside) {
        Some(sd) if sd > 0.0 => TRADING_DAYS.sqrt() * mean(&ex) / sd,
        _ => 0.0,
    }
}

pub fn assess(win_rate: f64, profit_pct: f64, max_drawdown: f64, sharpe: f64) -> Quality {
    if win_rate > 70.0 && profit_pct > 50.0 && max_drawdown < -20.0 {
        Quality::Overfit
    } else if win_rate < 30.0 || profit_pct < -10.0 {
        Quality::Poor
    } else if sharpe > 1.0 && max_drawdown > -15.0 {
        Quality::Good
    } else {
        Quality::Moderate
    }
}
