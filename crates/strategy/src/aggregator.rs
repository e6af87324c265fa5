use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{debug, error, warn};

use common::{
    BotSettings, Candle, MarketConditions, MarketRegime, RankedSignal, Side, SignalProposal,
    StrategyId,
};

use crate::{Strategy, StrategyRegistry};

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Ranked signals below this final confidence are dropped.
    pub min_confidence: f64,
    /// Fan strategy evaluation out to the blocking pool.
    pub parallel: bool,
    /// Per-strategy budget when running in parallel.
    pub strategy_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            parallel: true,
            strategy_timeout: Duration::from_secs(10),
        }
    }
}

impl AggregatorConfig {
    pub fn from_settings(settings: &BotSettings) -> Self {
        Self {
            min_confidence: settings.risk_management.min_confidence,
            parallel: settings.performance.parallel_strategy_execution,
            strategy_timeout: Duration::from_secs(settings.performance.strategy_timeout_secs.max(1)),
        }
    }
}

/// Runs the selected strategies over one candle snapshot, rescores their
/// proposals against market conditions, and ranks them.
#[derive(Clone)]
pub struct SignalAggregator {
    registry: StrategyRegistry,
    config: AggregatorConfig,
}

impl SignalAggregator {
    pub fn new(registry: StrategyRegistry, config: AggregatorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn selected(&self, symbol: &str, selected: &BTreeSet<StrategyId>) -> Vec<Arc<dyn Strategy>> {
        selected
            .iter()
            .filter_map(|&id| {
                let s = self.registry.get(id);
                if s.is_none() {
                    debug!(symbol, strategy = %id, "Selected strategy is not active, skipping");
                }
                s
            })
            .collect()
    }

    /// Evaluate the selected strategies and gather their proposals in
    /// selection order. Waits for every strategy (or its timeout) before
    /// returning. A strategy that errors, panics or times out contributes
    /// nothing.
    pub async fn collect(
        &self,
        symbol: &str,
        selected: &BTreeSet<StrategyId>,
        candles: Arc<[Candle]>,
        higher: Option<Arc<[Candle]>>,
    ) -> Vec<SignalProposal> {
        if !self.config.parallel {
            return self.collect_sequential(symbol, selected, &candles, higher.as_deref());
        }

        let timeout = self.config.strategy_timeout;
        let tasks = self.selected(symbol, selected).into_iter().map(|strategy| {
            let candles = Arc::clone(&candles);
            let higher = higher.clone();
            let id = strategy.id();
            let handle =
                tokio::task::spawn_blocking(move || strategy.evaluate(&candles, higher.as_deref()));
            async move { (id, tokio::time::timeout(timeout, handle).await) }
        });

        let mut proposals = Vec::new();
        for (id, outcome) in join_all(tasks).await {
            match outcome {
                Ok(Ok(Ok(Some(p)))) => proposals.push(p),
                Ok(Ok(Ok(None))) => {}
                Ok(Ok(Err(e))) => warn!(symbol, strategy = %id, error = %e, "Strategy evaluation failed"),
                Ok(Err(e)) => error!(symbol, strategy = %id, error = %e, "Strategy panicked"),
                Err(_) => warn!(symbol, strategy = %id, ?timeout, "Strategy timed out"),
            }
        }
        proposals
    }

    /// Same as [`collect`](Self::collect) on the calling thread.
    pub fn collect_sequential(
        &self,
        symbol: &str,
        selected: &BTreeSet<StrategyId>,
        candles: &[Candle],
        higher: Option<&[Candle]>,
    ) -> Vec<SignalProposal> {
        let mut proposals = Vec::new();
        for strategy in self.selected(symbol, selected) {
            let id = strategy.id();
            match catch_unwind(AssertUnwindSafe(|| strategy.evaluate(candles, higher))) {
                Ok(Ok(Some(p))) => proposals.push(p),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(symbol, strategy = %id, error = %e, "Strategy evaluation failed"),
                Err(_) => error!(symbol, strategy = %id, "Strategy panicked"),
            }
        }
        proposals
    }

    /// Score, rank (highest first, ties in arrival order) and filter by the
    /// confidence floor. Malformed proposals are dropped with a warning.
    pub fn aggregate(
        &self,
        symbol: &str,
        proposals: Vec<SignalProposal>,
        conditions: &MarketConditions,
        now: DateTime<Utc>,
    ) -> Vec<RankedSignal> {
        let mut ranked: Vec<RankedSignal> = proposals
            .into_iter()
            .filter_map(|proposal| {
                if !proposal.is_well_formed() {
                    warn!(
                        symbol,
                        strategy = %proposal.strategy,
                        side = %proposal.side,
                        entry = proposal.entry_price,
                        sl = proposal.stop_loss,
                        tp = proposal.take_profit,
                        confidence = proposal.confidence,
                        "Dropping malformed proposal"
                    );
                    return None;
                }
                let final_confidence = score(&proposal, conditions);
                Some(RankedSignal {
                    proposal,
                    final_confidence,
                    symbol: symbol.to_string(),
                    timestamp: now,
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.final_confidence.total_cmp(&a.final_confidence));
        ranked.retain(|r| {
            let keep = r.final_confidence >= self.config.min_confidence;
            if !keep {
                debug!(
                    symbol,
                    strategy = %r.strategy(),
                    confidence = r.final_confidence,
                    "Below confidence floor"
                );
            }
            keep
        });
        ranked
    }
}

/// Market-adjusted confidence in [0, 1].
///
/// Raw confidence +0.1 on volume above 1.2× average, +0.05 when volatility
/// exceeds 2%. In a trending regime a with-trend signal gains 0.1..0.3 and a
/// counter-trend one is scaled by 0.9..0.7, both growing with trend strength
/// up to 5%.
pub fn score(proposal: &SignalProposal, conditions: &MarketConditions) -> f64 {
    let mut confidence = proposal.confidence;
    if conditions.volume_ratio > 1.2 {
        confidence += 0.1;
    }
    if conditions.volatility > 0.02 {
        confidence += 0.05;
    }

    let trend_side = match conditions.regime {
        MarketRegime::BullishTrending => Some(Side::Buy),
        MarketRegime::BearishTrending => Some(Side::Sell),
        _ => None,
    };
    if let Some(trend_side) = trend_side {
        let strength = conditions.trend_strength / 0.05;
        let strength = if strength.is_finite() { strength.clamp(0.0, 1.0) } else { 0.0 };
        if proposal.side == trend_side {
            confidence += 0.1 + 0.2 * strength;
        } else {
            confidence *= 0.9 - 0.2 * strength;
        }
    }
    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::{Error, Result};

    fn proposal(strategy: StrategyId, side: Side, confidence: f64) -> SignalProposal {
        let (sl, tp) = match side {
            Side::Buy => (95.0, 110.0),
            Side::Sell => (105.0, 90.0),
        };
        SignalProposal {
            strategy,
            side,
            entry_price: 100.0,
            stop_loss: sl,
            take_profit: tp,
            suggested_size: 0.001,
            confidence,
        }
    }

    fn neutral() -> MarketConditions {
        MarketConditions {
            regime: MarketRegime::Sideways,
            volatility: 0.01,
            trend_strength: 0.0,
            volume_ratio: 1.0,
            current_price: 100.0,
            atr: 1.0,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn aggregator(registry: StrategyRegistry, parallel: bool) -> SignalAggregator {
        SignalAggregator::new(
            registry,
            AggregatorConfig {
                min_confidence: 0.6,
                parallel,
                strategy_timeout: Duration::from_millis(100),
            },
        )
    }

    // ─── Scoring ──────────────────────────────────────────────────────────────

    #[test]
    fn neutral_conditions_leave_confidence_unchanged() {
        let p = proposal(StrategyId::EmaVwap, Side::Buy, 0.65);
        assert_eq!(score(&p, &neutral()), 0.65);
    }

    #[test]
    fn volume_and_volatility_bonuses_add() {
        let mut c = neutral();
        c.volume_ratio = 1.5;
        c.volatility = 0.03;
        let p = proposal(StrategyId::EmaVwap, Side::Buy, 0.5);
        assert!((score(&p, &c) - 0.65).abs() < 1e-9);
    }

    #[test]
    fn with_trend_gains_and_counter_trend_loses() {
        let mut c = neutral();
        c.regime = MarketRegime::BullishTrending;
        c.trend_strength = 0.05;
        let with = score(&proposal(StrategyId::EmaVwap, Side::Buy, 0.5), &c);
        let against = score(&proposal(StrategyId::EmaVwap, Side::Sell, 0.5), &c);
        assert!((with - 0.8).abs() < 1e-9);
        assert!((against - 0.35).abs() < 1e-9);

        c.trend_strength = 0.0;
        let weak = score(&proposal(StrategyId::EmaVwap, Side::Sell, 0.5), &c);
        assert!((weak - 0.45).abs() < 1e-9);
    }

    #[test]
    fn score_is_clamped_to_one() {
        let mut c = neutral();
        c.regime = MarketRegime::BearishTrending;
        c.trend_strength = 0.5;
        c.volume_ratio = 3.0;
        c.volatility = 0.1;
        assert_eq!(score(&proposal(StrategyId::EmaVwap, Side::Sell, 0.9), &c), 1.0);
    }

    // ─── Ranking ──────────────────────────────────────────────────────────────

    #[test]
    fn ranks_descending_and_filters_floor() {
        let agg = aggregator(StrategyRegistry::default(), false);
        let ranked = agg.aggregate(
            "BTCUSDT",
            vec![
                proposal(StrategyId::EmaVwap, Side::Buy, 0.62),
                proposal(StrategyId::SupertrendAtr, Side::Buy, 0.55),
                proposal(StrategyId::TrendMomentum, Side::Buy, 0.8),
            ],
            &neutral(),
            now(),
        );
        let order: Vec<_> = ranked.iter().map(|r| r.strategy()).collect();
        assert_eq!(order, vec![StrategyId::TrendMomentum, StrategyId::EmaVwap]);
        assert!(ranked.iter().all(|r| r.symbol == "BTCUSDT" && r.timestamp == now()));
    }

    #[test]
    fn ties_keep_arrival_order() {
        let agg = aggregator(StrategyRegistry::default(), false);
        let ranked = agg.aggregate(
            "ETHUSDT",
            vec![
                proposal(StrategyId::BreakoutVolume, Side::Sell, 0.7),
                proposal(StrategyId::EmaVwap, Side::Buy, 0.7),
                proposal(StrategyId::MultiTimeframe, Side::Buy, 0.7),
            ],
            &neutral(),
            now(),
        );
        let order: Vec<_> = ranked.iter().map(|r| r.strategy()).collect();
        assert_eq!(
            order,
            vec![StrategyId::BreakoutVolume, StrategyId::EmaVwap, StrategyId::MultiTimeframe]
        );
    }

    #[test]
    fn malformed_proposals_are_dropped() {
        let agg = aggregator(StrategyRegistry::default(), false);
        let mut inverted = proposal(StrategyId::EmaVwap, Side::Buy, 0.9);
        inverted.stop_loss = 120.0;
        let nan = proposal(StrategyId::SupertrendAtr, Side::Buy, f64::NAN);
        let ranked = agg.aggregate(
            "BTCUSDT",
            vec![inverted, nan, proposal(StrategyId::TrendMomentum, Side::Buy, 0.7)],
            &neutral(),
            now(),
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].strategy(), StrategyId::TrendMomentum);
    }

    // ─── Evaluation ───────────────────────────────────────────────────────────

    enum Behaviour {
        Propose(f64),
        Nothing,
        Fail,
        Panic,
        Slow,
    }

    struct Fake {
        id: StrategyId,
        behaviour: Behaviour,
    }

    impl Strategy for Fake {
        fn id(&self) -> StrategyId {
            self.id
        }

        fn evaluate(&self, _c: &[Candle], _h: Option<&[Candle]>) -> Result<Option<SignalProposal>> {
            match self.behaviour {
                Behaviour::Propose(conf) => Ok(Some(proposal(self.id, Side::Buy, conf))),
                Behaviour::Nothing => Ok(None),
                Behaviour::Fail => Err(Error::Strategy {
                    strategy: self.id.to_string(),
                    message: "boom".into(),
                }),
                Behaviour::Panic => panic!("strategy bug"),
                Behaviour::Slow => {
                    std::thread::sleep(Duration::from_millis(400));
                    Ok(Some(proposal(self.id, Side::Buy, 0.9)))
                }
            }
        }
    }

    fn registry(entries: Vec<(StrategyId, Behaviour)>) -> StrategyRegistry {
        let mut r = StrategyRegistry::default();
        for (id, behaviour) in entries {
            r.insert(Arc::new(Fake { id, behaviour }));
        }
        r
    }

    fn all_selected() -> BTreeSet<StrategyId> {
        StrategyId::ALL.into_iter().collect()
    }

    fn snapshot() -> Arc<[Candle]> {
        Arc::from(Vec::<Candle>::new())
    }

    #[tokio::test]
    async fn faulty_strategies_are_isolated_in_parallel() {
        let agg = aggregator(
            registry(vec![
                (StrategyId::EmaVwap, Behaviour::Fail),
                (StrategyId::SupertrendAtr, Behaviour::Propose(0.7)),
                (StrategyId::TrendMomentum, Behaviour::Panic),
                (StrategyId::BreakoutVolume, Behaviour::Slow),
                (StrategyId::MultiTimeframe, Behaviour::Propose(0.8)),
                (StrategyId::BollingerBounce, Behaviour::Nothing),
            ]),
            true,
        );
        let got = tokio::time::timeout(
            Duration::from_secs(5),
            agg.collect("BTCUSDT", &all_selected(), snapshot(), None),
        )
        .await
        .expect("timeout");
        let ids: Vec<_> = got.iter().map(|p| p.strategy).collect();
        assert_eq!(ids, vec![StrategyId::SupertrendAtr, StrategyId::MultiTimeframe]);
    }

    #[tokio::test]
    async fn sequential_mode_isolates_panics_and_errors() {
        let agg = aggregator(
            registry(vec![
                (StrategyId::EmaVwap, Behaviour::Panic),
                (StrategyId::SupertrendAtr, Behaviour::Fail),
                (StrategyId::TrendMomentum, Behaviour::Propose(0.75)),
            ]),
            false,
        );
        let got = agg.collect("BTCUSDT", &all_selected(), snapshot(), None).await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].strategy, StrategyId::TrendMomentum);
    }

    #[test]
    fn only_selected_and_registered_strategies_run() {
        let agg = aggregator(
            registry(vec![
                (StrategyId::EmaVwap, Behaviour::Propose(0.7)),
                (StrategyId::SupertrendAtr, Behaviour::Propose(0.7)),
            ]),
            false,
        );
        let selected: BTreeSet<_> = [StrategyId::SupertrendAtr, StrategyId::BollingerBounce].into();
        let got = agg.collect_sequential("BTCUSDT", &selected, &[], None);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].strategy, StrategyId::SupertrendAtr);
    }
}
