//! Bar-by-bar historical replay of the signal pipeline with simulated
//! execution, fees and slippage, plus multi-run sweeps and scenario presets.

pub mod engine;
pub mod execution;
pub mod report;
pub mod sweep;

pub use engine::{BacktestConfig, BacktestEngine};
pub use execution::{ExecutionModel, ExecutionProfile, ExecutionSimulator};
pub use report::{BacktestReport, ExitReason, Quality, StrategyStats, Trade};
pub use sweep::{fetch_windows, window, Overrides, RunSpec, RunSummary, Scenario, ScenarioParams, SweepPlan, SweepSummary};
