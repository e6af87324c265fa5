use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use common::{
    BotSettings, MarketConditions, Notifier, RankedSignal, RejectionReason, Result, SignalProposal,
    StrategyId,
};
use risk::{RiskConfig, RiskDecision, RiskManager, SignalManager, SignalManagerConfig, Throttle};
use strategy::{
    AdaptiveStrategySelector, AggregatorConfig, MarketConditionAnalyzer, MarketInsights,
    SignalAggregator, StrategyRegistry,
};

use crate::alert;
use crate::cache::MarketDataCache;

/// Per-cycle inputs that do not change while the bot runs.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub symbols: Vec<String>,
    pub interval: String,
    pub higher_interval: String,
    pub kline_limit: usize,
    /// Replace strategy SL/TP with regime-adaptive levels before gating.
    pub adaptive_targets: bool,
}

impl CycleSettings {
    pub fn from_settings(settings: &BotSettings) -> Self {
        Self {
            symbols: settings.symbols.clone(),
            interval: settings.interval.clone(),
            higher_interval: settings.higher_interval.clone(),
            kline_limit: settings.kline_limit,
            adaptive_targets: settings.adaptive_targets,
        }
    }
}

/// What happened to one symbol in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    /// Candles unavailable; skipped until the next cycle.
    NoData,
    /// No proposal survived aggregation.
    NoSignal,
    /// The risk gate refused every candidate. Holds the last reason, or the
    /// circuit breaker that stopped evaluation.
    Rejected(RejectionReason),
    /// The risk gate approved a candidate but the rate/dedup gate held it.
    Throttled(Throttle),
    Dispatched(RankedSignal),
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub outcomes: Vec<(String, SymbolOutcome)>,
}

impl CycleReport {
    pub fn circuit_breaker(&self) -> Option<&RejectionReason> {
        self.outcomes.iter().find_map(|(_, o)| match o {
            SymbolOutcome::Rejected(r) if r.is_circuit_breaker() => Some(r),
            _ => None,
        })
    }

    /// At least one candidate passed the risk gate this cycle.
    pub fn risk_approved(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| matches!(o, SymbolOutcome::Throttled(_) | SymbolOutcome::Dispatched(_)))
    }

    pub fn dispatched(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SymbolOutcome::Dispatched(_)))
            .count()
    }
}

/// One pass of the signal pipeline over every configured symbol:
/// candles → conditions → selection → strategies → ranking → risk gate →
/// rate gate → dispatch and bookkeeping.
///
/// Owns the risk and signal-log state outright. Cycles run one at a time on
/// the engine task, so gate-then-record pairs cannot interleave.
pub struct SignalCycle {
    settings: CycleSettings,
    cache: MarketDataCache,
    analyzer: MarketConditionAnalyzer,
    selector: AdaptiveStrategySelector,
    aggregator: SignalAggregator,
    risk: RiskManager,
    signals: SignalManager,
    notifier: Arc<dyn Notifier>,
    insights: BTreeMap<String, MarketInsights>,
}

impl SignalCycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: CycleSettings,
        cache: MarketDataCache,
        selector: AdaptiveStrategySelector,
        aggregator: SignalAggregator,
        risk: RiskManager,
        signals: SignalManager,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            cache,
            analyzer: MarketConditionAnalyzer::new(),
            selector,
            aggregator,
            risk,
            signals,
            notifier,
            insights: BTreeMap::new(),
        }
    }

    /// Wire the whole pipeline from validated bot settings. Loads the
    /// persisted signal log.
    pub fn from_settings(
        settings: &BotSettings,
        source: Arc<dyn common::MarketDataSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let registry = StrategyRegistry::from_settings(settings)?;
        let aggregator = SignalAggregator::new(registry, AggregatorConfig::from_settings(settings));
        let ttl = Duration::from_secs(settings.performance.data_cache_minutes * 60);
        let rm = &settings.risk_management;

        Ok(Self::new(
            CycleSettings::from_settings(settings),
            MarketDataCache::new(source, ttl),
            AdaptiveStrategySelector::new(rm.enable_multi_timeframe),
            aggregator,
            RiskManager::new(RiskConfig::from(rm)),
            SignalManager::load(SignalManagerConfig::from(rm)),
            notifier,
        ))
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn risk_mut(&mut self) -> &mut RiskManager {
        &mut self.risk
    }

    pub fn signals(&self) -> &SignalManager {
        &self.signals
    }

    /// Latest market insights per symbol.
    pub fn insights(&self) -> &BTreeMap<String, MarketInsights> {
        &self.insights
    }

    /// Deliver a message without waiting. Failures are logged only.
    pub fn notify(&self, message: String) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&message, None).await {
                warn!(error = %e, "Notification failed");
            }
        });
    }

    pub async fn run_once(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        for symbol in self.settings.symbols.clone() {
            let outcome = self.run_symbol(&symbol).await;
            debug!(symbol = %symbol, ?outcome, "Symbol processed");
            report.outcomes.push((symbol, outcome));
        }
        report
    }

    pub async fn run_symbol(&mut self, symbol: &str) -> SymbolOutcome {
        let (interval, limit) = (self.settings.interval.clone(), self.settings.kline_limit);
        let Some(candles) = self.cache.get(symbol, &interval, limit).await else {
            return SymbolOutcome::NoData;
        };
        let Some(last) = candles.last() else {
            return SymbolOutcome::NoData;
        };

        for event in self.risk.check_exits(symbol, last.close) {
            self.notify(alert::event_message(&event));
        }

        let conditions = self.analyzer.analyze(&candles);
        let insights = self.selector.insights(&conditions);
        info!(
            symbol,
            regime = %insights.regime,
            volatility = %insights.volatility_regime,
            rr = insights.recommended_rr,
            risk = %insights.risk_level,
            "Market conditions"
        );
        self.insights.insert(symbol.to_string(), insights);

        let selected = self.selector.select(&conditions);
        if selected.is_empty() {
            return SymbolOutcome::NoSignal;
        }
        let higher = if selected.contains(&StrategyId::MultiTimeframe) {
            let higher_interval = self.settings.higher_interval.clone();
            self.cache.get(symbol, &higher_interval, limit).await
        } else {
            None
        };

        let proposals = self
            .aggregator
            .collect(symbol, &selected, Arc::clone(&candles), higher)
            .await;
        let ranked = self.aggregator.aggregate(symbol, proposals, &conditions, Utc::now());

        let mut outcome = SymbolOutcome::NoSignal;
        for mut signal in ranked {
            if self.settings.adaptive_targets {
                self.apply_adaptive_targets(&mut signal, &conditions);
            }

            match self.risk.gate(&signal) {
                RiskDecision::Approved => {}
                RiskDecision::Rejected(reason) if reason.is_circuit_breaker() => {
                    return SymbolOutcome::Rejected(reason);
                }
                RiskDecision::Rejected(reason) => {
                    if outcome == SymbolOutcome::NoSignal {
                        outcome = SymbolOutcome::Rejected(reason);
                    }
                    continue;
                }
            }

            if let Err(throttle) = self.signals.check_at(&signal, Utc::now()) {
                debug!(symbol, strategy = %signal.strategy(), %throttle, "Signal throttled");
                outcome = SymbolOutcome::Throttled(throttle);
                continue;
            }

            let p = &signal.proposal;
            let size = self.risk.get_position_size(p.entry_price, p.stop_loss, &candles);
            signal.proposal.suggested_size = size;
            self.risk.open_position(&signal, size);
            self.signals.record_signal(&signal);

            info!(
                symbol,
                strategy = %signal.strategy(),
                side = %signal.side(),
                confidence = signal.final_confidence,
                entry = signal.proposal.entry_price,
                sl = signal.proposal.stop_loss,
                tp = signal.proposal.take_profit,
                size,
                "Signal dispatched"
            );
            self.notify(alert::signal_message(&signal, &conditions));
            // At most one signal per symbol per cycle.
            return SymbolOutcome::Dispatched(signal);
        }
        outcome
    }

    fn apply_adaptive_targets(&self, signal: &mut RankedSignal, conditions: &MarketConditions) {
        let p = &signal.proposal;
        let Some((stop_loss, take_profit)) =
            self.selector.adaptive_sl_tp(p.entry_price, p.side, conditions, conditions.atr)
        else {
            return;
        };
        let adjusted = SignalProposal {
            stop_loss,
            take_profit,
            ..p.clone()
        };
        if adjusted.is_well_formed() {
            signal.proposal = adjusted;
        }
    }
}

#[cfg(test)]
mod tests {
    use common::{Side, TradeOutcome};

    use super::*;
    use crate::testing::{always_buy, series, FakeNotifier, FakeSource};

    fn settings(adaptive_targets: bool) -> CycleSettings {
        CycleSettings {
            symbols: vec!["BTCUSDT".into()],
            interval: "15m".into(),
            higher_interval: "1h".into(),
            kline_limit: 60,
            adaptive_targets,
        }
    }

    fn cycle(source: Arc<FakeSource>, notifier: Arc<FakeNotifier>, adaptive: bool, ttl: Duration) -> SignalCycle {
        let mut registry = StrategyRegistry::default();
        registry.insert(always_buy());
        SignalCycle::new(
            settings(adaptive),
            MarketDataCache::new(source, ttl),
            AdaptiveStrategySelector::new(true),
            SignalAggregator::new(registry, AggregatorConfig::default()),
            RiskManager::new(RiskConfig::default()),
            SignalManager::new(SignalManagerConfig::default()),
            notifier,
        )
    }

    #[tokio::test]
    async fn dispatches_and_records() {
        let notifier = Arc::new(FakeNotifier::default());
        let source = Arc::new(FakeSource::new(series(100.0, 60)));
        let mut c = cycle(source, notifier.clone(), false, Duration::from_secs(300));

        let report = c.run_once().await;
        assert_eq!(report.dispatched(), 1);
        let SymbolOutcome::Dispatched(signal) = &report.outcomes[0].1 else {
            panic!("expected dispatch, got {:?}", report.outcomes);
        };
        assert_eq!(signal.side(), Side::Buy);
        assert_eq!(signal.proposal.stop_loss, 97.0);
        assert!(signal.proposal.suggested_size >= risk::MIN_POSITION_SIZE);

        assert_eq!(c.risk().state().active_positions.len(), 1);
        assert_eq!(c.signals().entries().len(), 1);
        assert!(c.insights().contains_key("BTCUSDT"));

        let msg = notifier.wait_for("BUY BTCUSDT").await;
        assert!(msg.contains("MULTI_TIMEFRAME"));
    }

    #[tokio::test]
    async fn adaptive_targets_replace_strategy_levels() {
        let notifier = Arc::new(FakeNotifier::default());
        let source = Arc::new(FakeSource::new(series(100.0, 60)));
        let mut c = cycle(source, notifier, true, Duration::from_secs(300));

        let SymbolOutcome::Dispatched(signal) = c.run_symbol("BTCUSDT").await else {
            panic!("expected dispatch");
        };
        assert_ne!(signal.proposal.stop_loss, 97.0);
        assert!(signal.proposal.is_well_formed());
        assert!(signal.proposal.reward_risk_ratio() >= AdaptiveStrategySelector::MIN_RR - 1e-9);
    }

    #[tokio::test]
    async fn correlated_position_blocks_second_signal() {
        let notifier = Arc::new(FakeNotifier::default());
        let source = Arc::new(FakeSource::new(series(100.0, 60)));
        let mut c = cycle(source, notifier, false, Duration::from_secs(300));

        c.run_once().await;
        let outcome = c.run_symbol("BTCUSDT").await;
        assert!(matches!(outcome, SymbolOutcome::Rejected(RejectionReason::CorrelatedPosition { .. })));
        assert_eq!(c.signals().entries().len(), 1);
    }

    #[tokio::test]
    async fn exit_closes_position_then_gap_throttles() {
        let notifier = Arc::new(FakeNotifier::default());
        let source = Arc::new(FakeSource::new(series(100.0, 60)));
        let mut c = cycle(source.clone(), notifier.clone(), false, Duration::ZERO);

        c.run_once().await;
        source.set(series(110.0, 60));
        let outcome = c.run_symbol("BTCUSDT").await;

        assert_eq!(c.risk().state().total_trades, 1);
        assert_eq!(c.risk().state().winning_trades, 1);
        assert!(matches!(outcome, SymbolOutcome::Throttled(Throttle::TooSoon { .. })));
        notifier.wait_for("Take profit hit").await;
    }

    #[tokio::test]
    async fn missing_data_skips_symbol() {
        let notifier = Arc::new(FakeNotifier::default());
        let mut c = cycle(Arc::new(FakeSource::failing()), notifier, false, Duration::from_secs(300));
        let report = c.run_once().await;
        assert_eq!(report.outcomes[0].1, SymbolOutcome::NoData);
        assert_eq!(c.risk().state().total_trades, 0);
    }

    #[tokio::test]
    async fn from_settings_wires_risk_and_signal_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("signal_log.json");
        let config_path = dir.path().join("bot.toml");
        std::fs::write(
            &config_path,
            format!(
                "symbols = [\"BTCUSDT\", \"ETHUSDT\"]\n\
                 interval = \"15m\"\n\
                 active_strategies = [\"EMA_VWAP\", \"MULTI_TIMEFRAME\"]\n\
                 [risk_management]\n\
                 initial_balance = 5000.0\n\
                 signal_log_path = {:?}\n",
                log_path.display().to_string()
            ),
        )
        .unwrap();
        let settings = BotSettings::load(&config_path).unwrap();

        let c = SignalCycle::from_settings(
            &settings,
            Arc::new(FakeSource::new(series(100.0, 60))),
            Arc::new(FakeNotifier::default()),
        )
        .unwrap();
        assert_eq!(c.settings().symbols.len(), 2);
        assert_eq!(c.risk().state().current_balance, 5000.0);
        assert_eq!(c.signals().config().log_path.as_deref(), Some(log_path.as_path()));
    }

    #[tokio::test]
    async fn circuit_breaker_is_reported() {
        let notifier = Arc::new(FakeNotifier::default());
        let source = Arc::new(FakeSource::new(series(100.0, 60)));
        let mut c = cycle(source, notifier, false, Duration::from_secs(300));

        let losing = RankedSignal {
            proposal: SignalProposal {
                strategy: StrategyId::EmaVwap,
                side: Side::Buy,
                entry_price: 100.0,
                stop_loss: 99.0,
                take_profit: 102.0,
                suggested_size: 0.001,
                confidence: 0.7,
            },
            final_confidence: 0.7,
            symbol: "ETHUSDT".into(),
            timestamp: Utc::now(),
        };
        c.risk_mut().update_after_signal(&losing, TradeOutcome::Loss, -6.0);

        let report = c.run_once().await;
        assert!(matches!(report.circuit_breaker(), Some(RejectionReason::DailyDrawdown { .. })));
        assert!(!report.risk_approved());
        assert!(c.signals().entries().is_empty());
    }
}
