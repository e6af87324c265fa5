//! Multi-run backtests: symbol × interval × window sweeps and the
//! conservative / moderate / aggressive scenario presets.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use common::{Candle, Error, Result};

use crate::{BacktestConfig, BacktestReport, Quality};

/// Average win rate (percent) above which a scenario comparison is flagged
/// as probably overfit.
pub const OVERFIT_WIN_RATE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Conservative,
    Moderate,
    Aggressive,
}

/// Knobs a [`Scenario`] sets. `slippage` is the MEDIUM-volatility bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioParams {
    pub days: i64,
    pub risk_per_trade: f64,
    pub slippage: f64,
    pub fee_pct: f64,
    pub min_confidence: f64,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Conservative, Scenario::Moderate, Scenario::Aggressive];

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Conservative => "conservative",
            Scenario::Moderate => "moderate",
            Scenario::Aggressive => "aggressive",
        }
    }

    pub fn params(self) -> ScenarioParams {
        match self {
            Scenario::Conservative => ScenarioParams {
                days: 30,
                risk_per_trade: 0.01,
                slippage: 0.002,
                fee_pct: 0.002,
                min_confidence: 0.7,
            },
            Scenario::Moderate => ScenarioParams {
                days: 60,
                risk_per_trade: 0.02,
                slippage: 0.001,
                fee_pct: 0.001,
                min_confidence: 0.6,
            },
            Scenario::Aggressive => ScenarioParams {
                days: 90,
                risk_per_trade: 0.03,
                slippage: 0.0005,
                fee_pct: 0.0005,
                min_confidence: 0.5,
            },
        }
    }

    pub fn apply(self, config: BacktestConfig) -> BacktestConfig {
        let p = self.params();
        BacktestConfig {
            risk_per_trade: p.risk_per_trade,
            fee_pct: p.fee_pct,
            min_confidence: p.min_confidence,
            execution: config.execution.clone().with_slippage(p.slippage),
            ..config
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Scenario::ALL
            .into_iter()
            .find(|sc| sc.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unknown scenario '{s}'")))
    }
}

/// Values given explicitly on the command line. They win over a scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Overrides {
    pub risk_per_trade: Option<f64>,
    pub slippage: Option<f64>,
    pub fee_pct: Option<f64>,
    pub min_confidence: Option<f64>,
}

impl Overrides {
    pub fn apply(&self, config: BacktestConfig) -> BacktestConfig {
        let execution = match self.slippage {
            Some(s) => config.execution.clone().with_slippage(s),
            None => config.execution.clone(),
        };
        BacktestConfig {
            risk_per_trade: self.risk_per_trade.unwrap_or(config.risk_per_trade),
            fee_pct: self.fee_pct.unwrap_or(config.fee_pct),
            min_confidence: self.min_confidence.unwrap_or(config.min_confidence),
            execution,
            ..config
        }
    }
}

/// One backtest within a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub symbol: String,
    pub interval: String,
    pub days: i64,
    pub scenario: Option<Scenario>,
}

impl RunSpec {
    pub fn label(&self) -> String {
        match self.scenario {
            Some(sc) => format!("{}_{}_{}d_{sc}", self.symbol, self.interval, self.days),
            None => format!("{}_{}_{}d", self.symbol, self.interval, self.days),
        }
    }

    pub fn report_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", self.label()))
    }

    /// `base` with this run's symbol, then its scenario, then `overrides`.
    pub fn config(&self, base: &BacktestConfig, overrides: &Overrides) -> BacktestConfig {
        let config = BacktestConfig {
            symbol: self.symbol.clone(),
            ..base.clone()
        };
        let config = match self.scenario {
            Some(sc) => sc.apply(config),
            None => config,
        };
        overrides.apply(config)
    }
}

/// The cross product a `backtest` invocation asks for.
#[derive(Debug, Clone, Default)]
pub struct SweepPlan {
    pub symbols: Vec<String>,
    pub intervals: Vec<String>,
    /// Explicit windows. Empty means each scenario's own window.
    pub days: Vec<i64>,
    pub scenarios: Vec<Scenario>,
}

impl SweepPlan {
    /// Expand into runs, ordered by symbol, interval, scenario and window.
    pub fn runs(&self) -> Result<Vec<RunSpec>> {
        if self.symbols.is_empty() || self.intervals.is_empty() {
            return Err(Error::Config("at least one symbol and one interval are required".into()));
        }
        if self.days.iter().any(|d| *d <= 0) {
            return Err(Error::Config("day windows must be positive".into()));
        }
        if self.days.is_empty() && self.scenarios.is_empty() {
            return Err(Error::Config("give day windows or a scenario".into()));
        }

        let scenarios: Vec<Option<Scenario>> = if self.scenarios.is_empty() {
            vec![None]
        } else {
            self.scenarios.iter().copied().map(Some).collect()
        };

        let mut runs = Vec::new();
        for symbol in &self.symbols {
            for interval in &self.intervals {
                for scenario in &scenarios {
                    let windows = match (self.days.is_empty(), scenario) {
                        (true, Some(sc)) => vec![sc.params().days],
                        _ => self.days.clone(),
                    };
                    for days in windows {
                        runs.push(RunSpec {
                            symbol: symbol.trim().to_uppercase(),
                            interval: interval.trim().to_string(),
                            days,
                            scenario: *scenario,
                        });
                    }
                }
            }
        }
        Ok(runs)
    }
}

/// Longest window needed per (symbol, interval), so each series is fetched once.
pub fn fetch_windows(runs: &[RunSpec]) -> BTreeMap<(String, String), i64> {
    let mut windows: BTreeMap<(String, String), i64> = BTreeMap::new();
    for run in runs {
        let longest = windows.entry((run.symbol.clone(), run.interval.clone())).or_default();
        *longest = (*longest).max(run.days);
    }
    windows
}

/// Candles opened within `days` of `end`. `candles` must be oldest first.
pub fn window(candles: &[Candle], end: DateTime<Utc>, days: i64) -> &[Candle] {
    let from = end - Duration::days(days);
    let first = candles.partition_point(|c| c.open_time < from);
    &candles[first..]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub symbol: String,
    pub interval: String,
    pub days: i64,
    pub scenario: Option<Scenario>,
    pub total_trades: usize,
    pub win_rate: f64,
    pub profit_pct: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub final_balance: f64,
    pub quality: Quality,
}

impl RunSummary {
    pub fn new(run: &RunSpec, report: &BacktestReport) -> Self {
        Self {
            symbol: run.symbol.clone(),
            interval: run.interval.clone(),
            days: run.days,
            scenario: run.scenario,
            total_trades: report.total_trades,
            win_rate: report.win_rate,
            profit_pct: report.profit_pct,
            max_drawdown: report.max_drawdown,
            sharpe_ratio: report.sharpe_ratio,
            final_balance: report.final_balance,
            quality: report.quality,
        }
    }
}

/// All runs of a sweep, best profit first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub runs: Vec<RunSummary>,
}

impl SweepSummary {
    pub fn new(mut runs: Vec<RunSummary>) -> Self {
        runs.sort_by(|a, b| b.profit_pct.total_cmp(&a.profit_pct));
        Self { runs }
    }

    pub fn best(&self) -> Option<&RunSummary> {
        self.runs.first()
    }

    pub fn average_win_rate(&self) -> Option<f64> {
        if self.runs.is_empty() {
            return None;
        }
        Some(self.runs.iter().map(|r| r.win_rate).sum::<f64>() / self.runs.len() as f64)
    }

    /// True when the runs cover more than one scenario.
    pub fn compares_scenarios(&self) -> bool {
        self.runs.iter().filter_map(|r| r.scenario).collect::<BTreeSet<_>>().len() > 1
    }

    pub fn looks_overfit(&self) -> bool {
        self.average_win_rate().is_some_and(|w| w > OVERFIT_WIN_RATE)
    }

    /// Write the summary as pretty JSON, creating parent directories.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<10} {:>8} {:>5} {:<12} {:>6} {:>8} {:>9} {:>8} {:>7} {:>12}",
            "Symbol", "Interval", "Days", "Scenario", "Trades", "Win %", "Profit %", "Max DD", "Sharpe", "Final"
        )?;
        for r in &self.runs {
            writeln!(
                f,
                "{:<10} {:>8} {:>5} {:<12} {:>6} {:>7.2}% {:>+8.2}% {:>7.2}% {:>7.2} {:>12.2}",
                r.symbol,
                r.interval,
                r.days,
                r.scenario.map_or("-", Scenario::as_str),
                r.total_trades,
                r.win_rate,
                r.profit_pct,
                r.max_drawdown,
                r.sharpe_ratio,
                r.final_balance,
            )?;
        }
        write!(f, "{} runs", self.runs.len())?;

        if self.compares_scenarios() {
            if let Some(best) = self.best() {
                let name = best.scenario.map_or("-", Scenario::as_str);
                write!(f, "\nBest scenario: {name} ({:+.2}%)", best.profit_pct)?;
            }
            if let (true, Some(avg)) = (self.looks_overfit(), self.average_win_rate()) {
                write!(
                    f,
                    "\nWarning: average win rate {avg:.1}% is above {OVERFIT_WIN_RATE}%, results may be overfit"
                )?;
            }
        }
        Ok(())
    }
}
