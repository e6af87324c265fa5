use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use backtest::{BacktestConfig, BacktestEngine};
use common::{Candle, Result, Side, SignalProposal, StrategyId};
use strategy::{Strategy, StrategyRegistry};

/// Buys every close with a 2% stop and 3% target.
struct Scalper;

impl Strategy for Scalper {
    fn id(&self) -> StrategyId {
        StrategyId::MultiTimeframe
    }

    fn evaluate(&self, candles: &[Candle], _higher: Option<&[Candle]>) -> Result<Option<SignalProposal>> {
        Ok(candles.last().map(|c| SignalProposal {
            strategy: StrategyId::MultiTimeframe,
            side: Side::Buy,
            entry_price: c.close,
            stop_loss: c.close * 0.98,
            take_profit: c.close * 1.03,
            suggested_size: 0.001,
            confidence: 0.9,
        }))
    }
}

fn wave(n: usize) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + 8.0 * (i as f64 / 9.0).sin();
            Candle {
                open_time: start + Duration::hours(i as i64),
                open: close,
                high: close * 1.004,
                low: close * 0.996,
                close,
                volume: 50.0 + (i % 7) as f64,
            }
        })
        .collect()
}

fn engine(seed: u64) -> BacktestEngine {
    let mut registry = StrategyRegistry::default();
    registry.insert(Arc::new(Scalper));
    BacktestEngine::new(
        registry,
        BacktestConfig {
            seed,
            ..BacktestConfig::default()
        },
    )
}

#[test]
fn same_seed_same_report() {
    let candles = wave(400);
    let a = engine(7).run(&candles, None).unwrap();
    let b = engine(7).run(&candles, None).unwrap();

    assert!(a.total_trades > 0);
    assert_eq!(a.trades, b.trades);
    assert_eq!(a.final_balance, b.final_balance);
    assert_eq!(a.failed_executions, b.failed_executions);
}

#[test]
fn balances_chain_through_trades() {
    let report = engine(11).run(&wave(400), None).unwrap();
    let mut balance = report.initial_balance;
    for t in &report.trades {
        assert!((t.balance_after - (balance + t.profit)).abs() < 1e-6);
        assert!(t.exit_time >= t.entry_time);
        balance = t.balance_after;
    }
    assert!((report.final_balance - balance).abs() < 1e-9);
    assert_eq!(report.wins + report.losses, report.total_trades);
}

#[test]
fn default_strategies_run_cleanly() {
    let registry = StrategyRegistry::with_defaults().unwrap();
    let report = BacktestEngine::new(registry, BacktestConfig::default())
        .run(&wave(300), None)
        .unwrap();
    assert!(report.max_drawdown >= 0.0);
    assert_eq!(report.trades.len(), report.total_trades);
}
