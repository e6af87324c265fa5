use chrono::{DateTime, Utc};
use tracing::{debug, info};

use common::{Candle, Error, RankedSignal, Result, Side, SignalProposal, TradeOutcome, VolatilityRegime};
use risk::{RiskConfig, RiskManager};
use strategy::{
    AdaptiveStrategySelector, AggregatorConfig, MarketConditionAnalyzer, SignalAggregator,
    StrategyRegistry,
};

use crate::execution::{ExecutionModel, ExecutionSimulator};
use crate::report::{BacktestReport, ExitReason, Trade};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub symbol: String,
    pub initial_balance: f64,
    /// Ranked signals below this final confidence are not traded.
    pub min_confidence: f64,
    /// Fee per side as a fraction of notional.
    pub fee_pct: f64,
    /// Fraction of balance lost if the stop is hit.
    pub risk_per_trade: f64,
    /// Bars before the first evaluation. Never below the analyzer's minimum.
    pub warmup: usize,
    pub seed: u64,
    pub execution: ExecutionModel,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".into(),
            initial_balance: 1000.0,
            min_confidence: 0.6,
            fee_pct: 0.001,
            risk_per_trade: 0.01,
            warmup: MarketConditionAnalyzer::MIN_CANDLES,
            seed: 42,
            execution: ExecutionModel::default(),
        }
    }
}

struct OpenPosition {
    signal: RankedSignal,
    entry_time: DateTime<Utc>,
    entry_price: f64,
    quantity: f64,
    regime: VolatilityRegime,
}

/// Replays a candle series through the live pipeline (conditions, selection,
/// strategies, ranking) one bar at a time, holding at most one position.
///
/// Account bookkeeping goes through a `RiskManager`; its gates are not
/// applied, so a losing streak does not end the replay.
pub struct BacktestEngine {
    config: BacktestConfig,
    analyzer: MarketConditionAnalyzer,
    selector: AdaptiveStrategySelector,
    aggregator: SignalAggregator,
}

impl BacktestEngine {
    pub fn new(registry: StrategyRegistry, config: BacktestConfig) -> Self {
        let aggregator = SignalAggregator::new(
            registry,
            AggregatorConfig {
                min_confidence: config.min_confidence,
                parallel: false,
                ..AggregatorConfig::default()
            },
        );
        Self {
            config,
            analyzer: MarketConditionAnalyzer::new(),
            selector: AdaptiveStrategySelector::default(),
            aggregator,
        }
    }

    pub fn with_selector(mut self, selector: AdaptiveStrategySelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run over `candles` (oldest first). `higher` is the optional
    /// higher-timeframe series for multi-timeframe confirmation; at each bar
    /// only its candles opened by then are visible.
    pub fn run(&self, candles: &[Candle], higher: Option<&[Candle]>) -> Result<BacktestReport> {
        let cfg = &self.config;
        if !(cfg.initial_balance > 0.0) {
            return Err(Error::Config("initial_balance must be positive".into()));
        }
        if !(0.0..1.0).contains(&cfg.fee_pct) || !(cfg.risk_per_trade > 0.0 && cfg.risk_per_trade <= 1.0) {
            return Err(Error::Config("fee_pct must be in [0, 1) and risk_per_trade in (0, 1]".into()));
        }
        let ex = &cfg.execution;
        if [ex.low, ex.medium, ex.high, ex.extreme]
            .iter()
            .any(|p| !(p.slippage >= 0.0 && p.slippage.is_finite()) || !(0.0..=1.0).contains(&p.failure_probability))
        {
            return Err(Error::Config("slippage must be finite and non-negative, failure_probability in [0, 1]".into()));
        }

        let symbol = cfg.symbol.as_str();
        let warmup = cfg.warmup.max(MarketConditionAnalyzer::MIN_CANDLES);
        let start = candles.first().map(|c| c.open_time).unwrap_or_else(Utc::now);
        let mut risk = RiskManager::new_at(
            RiskConfig {
                initial_balance: cfg.initial_balance,
                ..RiskConfig::default()
            },
            start,
        );
        let mut sim = ExecutionSimulator::new(cfg.execution.clone(), cfg.seed);
        let mut trades = Vec::new();
        let mut failed_executions = 0;
        let mut open: Option<OpenPosition> = None;

        info!(symbol, candles = candles.len(), warmup, seed = cfg.seed, "Backtest starting");

        for i in warmup..candles.len() {
            let window = &candles[..i];
            let bar = window[i - 1];

            if let Some(pos) = open.take() {
                match exit_hit(&pos.signal.proposal, bar.close) {
                    Some((reason, price)) => {
                        trades.push(self.close(&mut risk, pos, price, reason, bar.open_time));
                    }
                    None => open = Some(pos),
                }
                continue;
            }

            let conditions = self.analyzer.analyze(window);
            let selected = self.selector.select(&conditions);
            if selected.is_empty() {
                continue;
            }
            let higher_window = higher.map(|h| {
                let end = h.partition_point(|c| c.open_time <= bar.open_time);
                &h[..end]
            });
            let proposals = self
                .aggregator
                .collect_sequential(symbol, &selected, window, higher_window);
            let Some(signal) = self
                .aggregator
                .aggregate(symbol, proposals, &conditions, bar.open_time)
                .into_iter()
                .next()
            else {
                continue;
            };

            let regime = conditions.volatility_regime();
            let p = &signal.proposal;
            let Some(fill) = sim.enter(p.side, p.entry_price, regime) else {
                failed_executions += 1;
                debug!(symbol, at = %bar.open_time, %regime, "Execution failed");
                continue;
            };
            if !fill_inside_levels(p, fill) {
                failed_executions += 1;
                debug!(symbol, at = %bar.open_time, fill, "Fill slipped past a level, skipped");
                continue;
            }

            let balance = risk.state().current_balance;
            let stop_distance = (fill - p.stop_loss).abs() / fill;
            let notional = balance * (cfg.risk_per_trade / stop_distance).min(1.0);
            debug!(
                symbol,
                at = %bar.open_time,
                strategy = %p.strategy,
                side = %p.side,
                fill,
                notional,
                "Position opened"
            );
            open = Some(OpenPosition {
                quantity: notional / fill,
                entry_price: fill,
                entry_time: bar.open_time,
                regime,
                signal,
            });
        }

        if let (Some(pos), Some(last)) = (open.take(), candles.last()) {
            let price = sim.exit(pos.signal.side(), last.close, VolatilityRegime::Medium);
            trades.push(self.close(&mut risk, pos, price, ExitReason::EndOfData, last.open_time));
        }

        let report = BacktestReport::from_trades(symbol, cfg.initial_balance, trades, failed_executions);
        info!(
            symbol,
            trades = report.total_trades,
            win_rate = report.win_rate,
            profit_pct = report.profit_pct,
            max_drawdown = report.max_drawdown,
            quality = ?report.quality,
            "Backtest complete"
        );
        Ok(report)
    }

    fn close(
        &self,
        risk: &mut RiskManager,
        pos: OpenPosition,
        exit_price: f64,
        exit_reason: ExitReason,
        at: DateTime<Utc>,
    ) -> Trade {
        let side = pos.signal.side();
        let gross = pos.quantity * (exit_price - pos.entry_price) * side.direction();
        let fees = self.config.fee_pct * pos.quantity * (pos.entry_price + exit_price);
        let profit = gross - fees;
        let balance = risk.state().current_balance;
        let profit_pct = if balance > 0.0 { profit / balance * 100.0 } else { 0.0 };
        let outcome = if profit > 0.0 { TradeOutcome::Win } else { TradeOutcome::Loss };

        risk.update_after_signal_at(&pos.signal, outcome, profit_pct, at);

        let p = pos.signal.proposal;
        Trade {
            strategy: p.strategy,
            side,
            confidence: pos.signal.final_confidence,
            entry_time: pos.entry_time,
            exit_time: at,
            entry_price: pos.entry_price,
            exit_price,
            stop_loss: p.stop_loss,
            take_profit: p.take_profit,
            quantity: pos.quantity,
            profit,
            profit_pct,
            balance_after: risk.state().current_balance,
            outcome,
            exit_reason,
            volatility_regime: pos.regime,
        }
    }
}

/// Whether `close` reached the target or the stop, and the level filled.
fn exit_hit(p: &SignalProposal, close: f64) -> Option<(ExitReason, f64)> {
    match p.side {
        Side::Buy if close >= p.take_profit => Some((ExitReason::TakeProfit, p.take_profit)),
        Side::Buy if close <= p.stop_loss => Some((ExitReason::StopLoss, p.stop_loss)),
        Side::Sell if close <= p.take_profit => Some((ExitReason::TakeProfit, p.take_profit)),
        Side::Sell if close >= p.stop_loss => Some((ExitReason::StopLoss, p.stop_loss)),
        _ => None,
    }
}

fn fill_inside_levels(p: &SignalProposal, fill: f64) -> bool {
    match p.side {
        Side::Buy => p.stop_loss < fill && fill < p.take_profit,
        Side::Sell => p.take_profit < fill && fill < p.stop_loss,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};

    use common::StrategyId;
    use strategy::Strategy;

    use super::*;

    /// Buys every bar's close with a 3% stop and 6% target.
    struct Buyer;

    impl Strategy for Buyer {
        fn id(&self) -> StrategyId {
            StrategyId::MultiTimeframe
        }

        fn evaluate(&self, candles: &[Candle], _higher: Option<&[Candle]>) -> Result<Option<SignalProposal>> {
            let Some(last) = candles.last() else {
                return Ok(None);
            };
            Ok(Some(SignalProposal {
                strategy: StrategyId::MultiTimeframe,
                side: Side::Buy,
                entry_price: last.close,
                stop_loss: last.close * 0.97,
                take_profit: last.close * 1.06,
                suggested_size: 0.001,
                confidence: 0.8,
            }))
        }
    }

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: start + Duration::minutes(15 * i as i64),
                open: c,
                high: c * 1.005,
                low: c * 0.995,
                close: c,
                volume: 10.0,
            })
            .collect()
    }

    fn engine(config: BacktestConfig) -> BacktestEngine {
        let mut registry = StrategyRegistry::default();
        registry.insert(Arc::new(Buyer));
        BacktestEngine::new(registry, config)
    }

    fn frictionless() -> BacktestConfig {
        BacktestConfig {
            execution: ExecutionModel::frictionless(),
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn take_profit_then_force_close() {
        let mut closes = vec![100.0; 60];
        closes.extend([110.0; 5]);
        let report = engine(frictionless()).run(&candles(&closes), None).unwrap();

        assert_eq!(report.total_trades, 2);
        assert_eq!(report.failed_executions, 0);

        let first = &report.trades[0];
        assert_eq!(first.exit_reason, ExitReason::TakeProfit);
        assert_eq!(first.outcome, TradeOutcome::Win);
        assert_eq!(first.exit_price, first.take_profit);
        // 1% risk over a 3% stop: a third of the balance.
        let qty = 1000.0 / 3.0 / 100.0;
        let expected = qty * 6.0 - 0.001 * qty * (100.0 + 106.0);
        assert!((first.profit - expected).abs() < 1e-9);
        assert!((first.balance_after - (1000.0 + expected)).abs() < 1e-9);

        let last = &report.trades[1];
        assert_eq!(last.exit_reason, ExitReason::EndOfData);
        // Flat exit only pays fees.
        assert_eq!(last.outcome, TradeOutcome::Loss);
        assert!(last.profit < 0.0);
        assert_eq!(report.final_balance, last.balance_after);
    }

    #[test]
    fn stop_loss_is_a_loss() {
        let mut closes = vec![100.0; 55];
        closes.extend([96.0; 3]);
        let report = engine(frictionless()).run(&candles(&closes), None).unwrap();
        let first = &report.trades[0];
        assert_eq!(first.exit_reason, ExitReason::StopLoss);
        assert_eq!(first.exit_price, first.stop_loss);
        assert_eq!(first.outcome, TradeOutcome::Loss);
    }

    #[test]
    fn nothing_before_warmup() {
        let report = engine(frictionless()).run(&candles(&[100.0; 45]), None).unwrap();
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.final_balance, 1000.0);
    }

    #[test]
    fn confidence_floor_blocks_trades() {
        let config = BacktestConfig {
            min_confidence: 0.95,
            ..frictionless()
        };
        let report = engine(config).run(&candles(&[100.0; 80]), None).unwrap();
        assert_eq!(report.total_trades, 0);
    }

    #[test]
    fn rejects_bad_config() {
        let config = BacktestConfig {
            initial_balance: 0.0,
            ..BacktestConfig::default()
        };
        assert!(matches!(engine(config).run(&candles(&[100.0; 80]), None), Err(Error::Config(_))));

        for bad in [
            BacktestConfig { risk_per_trade: 0.0, ..BacktestConfig::default() },
            BacktestConfig { risk_per_trade: 1.5, ..BacktestConfig::default() },
            BacktestConfig { fee_pct: 1.0, ..BacktestConfig::default() },
            BacktestConfig { execution: ExecutionModel::default().with_slippage(-0.001), ..BacktestConfig::default() },
            BacktestConfig { execution: ExecutionModel::default().with_slippage(f64::NAN), ..BacktestConfig::default() },
        ] {
            assert!(matches!(engine(bad).run(&candles(&[100.0; 80]), None), Err(Error::Config(_))));
        }
    }

    #[test]
    fn risk_per_trade_sizes_the_position() {
        let mut closes = vec![100.0; 60];
        closes.extend([110.0; 5]);
        let config = BacktestConfig {
            risk_per_trade: 0.02,
            ..frictionless()
        };
        let report = engine(config).run(&candles(&closes), None).unwrap();
        let first = &report.trades[0];
        // 2% risk over a 3% stop: two thirds of the balance.
        let qty = 1000.0 * 2.0 / 3.0 / 100.0;
        assert!((first.quantity - qty).abs() < 1e-9);
        let expected = qty * 6.0 - 0.001 * qty * (100.0 + 106.0);
        assert!((first.profit - expected).abs() < 1e-9);
    }

    #[test]
    fn exit_levels_by_side() {
        let sell = SignalProposal {
            strategy: StrategyId::EmaVwap,
            side: Side::Sell,
            entry_price: 100.0,
            stop_loss: 103.0,
            take_profit: 94.0,
            suggested_size: 0.001,
            confidence: 0.7,
        };
        assert_eq!(exit_hit(&sell, 93.0), Some((ExitReason::TakeProfit, 94.0)));
        assert_eq!(exit_hit(&sell, 103.5), Some((ExitReason::StopLoss, 103.0)));
        assert_eq!(exit_hit(&sell, 100.0), None);
        assert!(fill_inside_levels(&sell, 100.1));
        assert!(!fill_inside_levels(&sell, 103.1));
    }
}
