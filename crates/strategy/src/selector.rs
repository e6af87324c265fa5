use std::collections::BTreeSet;

use serde::Serialize;

use common::{MarketConditions, MarketRegime, Side, StrategyId, VolatilityRegime};

/// Maps a market regime to the strategies worth running and to regime-aware
/// stop/target levels.
#[derive(Debug, Clone)]
pub struct AdaptiveStrategySelector {
    /// Always add the multi-timeframe cross-check to the selection.
    include_multi_timeframe: bool,
}

/// Per-cycle summary for logs and the operator status message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketInsights {
    pub regime: MarketRegime,
    pub volatility_regime: VolatilityRegime,
    pub recommended_rr: f64,
    pub recommended_strategies: Vec<StrategyId>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

struct BucketTargets {
    rr: f64,
    sl_mult: f64,
}

fn bucket_targets(bucket: VolatilityRegime) -> BucketTargets {
    match bucket {
        VolatilityRegime::Low => BucketTargets { rr: 1.5, sl_mult: 1.0 },
        VolatilityRegime::Medium => BucketTargets { rr: 2.0, sl_mult: 1.2 },
        VolatilityRegime::High => BucketTargets { rr: 2.5, sl_mult: 1.5 },
        VolatilityRegime::Extreme => BucketTargets { rr: 3.0, sl_mult: 2.0 },
    }
}

impl Default for AdaptiveStrategySelector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AdaptiveStrategySelector {
    pub const MIN_RR: f64 = 1.5;
    pub const MAX_RR: f64 = 4.0;

    pub fn new(include_multi_timeframe: bool) -> Self {
        Self { include_multi_timeframe }
    }

    /// Strategies suited to the current regime, in identifier order.
    pub fn select(&self, conditions: &MarketConditions) -> BTreeSet<StrategyId> {
        use StrategyId::*;

        let mut set: BTreeSet<StrategyId> = match conditions.regime {
            MarketRegime::BullishTrending | MarketRegime::BearishTrending => {
                [EmaVwap, SupertrendAtr, TrendMomentum].into()
            }
            MarketRegime::Volatile => [BreakoutVolume, TrendMomentum].into(),
            MarketRegime::Sideways | MarketRegime::Consolidation => {
                let mut s: BTreeSet<_> = [EmaVwap, BollingerBounce].into();
                if conditions.volume_ratio > 1.2 {
                    s.insert(BreakoutVolume);
                }
                s
            }
            MarketRegime::Unknown => BTreeSet::new(),
        };
        if self.include_multi_timeframe {
            set.insert(MultiTimeframe);
        }
        set
    }

    /// Reward:risk target for the current conditions, within [1.5, 4.0].
    pub fn adaptive_rr_ratio(&self, conditions: &MarketConditions) -> f64 {
        let mut rr = bucket_targets(conditions.volatility_regime()).rr;

        rr *= match conditions.regime {
            MarketRegime::BullishTrending | MarketRegime::BearishTrending => 1.2,
            MarketRegime::Volatile => 1.3,
            MarketRegime::Consolidation => 0.8,
            MarketRegime::Sideways | MarketRegime::Unknown => 1.0,
        };
        if conditions.regime.is_trending() && conditions.trend_strength > 0.05 {
            rr *= 1.1;
        }
        if conditions.volume_ratio > 1.5 {
            rr *= 1.05;
        } else if conditions.volume_ratio < 0.5 {
            rr *= 0.95;
        }
        if !rr.is_finite() {
            return Self::MIN_RR;
        }
        rr.clamp(Self::MIN_RR, Self::MAX_RR)
    }

    /// Stop and target for an entry: stop distance is `atr` scaled by the
    /// volatility bucket, tightened in trends and widened when volatile; the
    /// target sits `adaptive_rr_ratio` stop-distances away.
    ///
    /// `None` when `entry` or `atr` is not positive, or when the levels would
    /// not bracket the entry with positive prices.
    pub fn adaptive_sl_tp(
        &self,
        entry: f64,
        side: Side,
        conditions: &MarketConditions,
        atr: f64,
    ) -> Option<(f64, f64)> {
        if !(entry.is_finite() && entry > 0.0 && atr.is_finite() && atr > 0.0) {
            return None;
        }
        let mut distance = atr * bucket_targets(conditions.volatility_regime()).sl_mult;
        if conditions.regime.is_trending() {
            distance *= 0.8;
        } else if conditions.regime == MarketRegime::Volatile {
            distance *= 1.5;
        }
        let rr = self.adaptive_rr_ratio(conditions);
        let dir = side.direction();
        let (sl, tp) = (entry - dir * distance, entry + dir * distance * rr);
        (sl > 0.0 && tp > 0.0).then_some((sl, tp))
    }

    pub fn insights(&self, conditions: &MarketConditions) -> MarketInsights {
        let risk_level = if conditions.volatility > 0.05 {
            RiskLevel::High
        } else if conditions.volatility > 0.02 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        MarketInsights {
            regime: conditions.regime,
            volatility_regime: conditions.volatility_regime(),
            recommended_rr: self.adaptive_rr_ratio(conditions),
            recommended_strategies: self.select(conditions).into_iter().collect(),
            risk_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conditions(regime: MarketRegime, volatility: f64, trend: f64, volume: f64) -> MarketConditions {
        MarketConditions {
            regime,
            volatility,
            trend_strength: trend,
            volume_ratio: volume,
            current_price: 100.0,
            atr: 100.0 * volatility,
        }
    }

    #[test]
    fn trending_selects_trend_followers_plus_mtf() {
        let sel = AdaptiveStrategySelector::default();
        let s = sel.select(&conditions(MarketRegime::BullishTrending, 0.01, 0.02, 1.0));
        let expected: BTreeSet<_> = [
            StrategyId::EmaVwap,
            StrategyId::SupertrendAtr,
            StrategyId::TrendMomentum,
            StrategyId::MultiTimeframe,
        ]
        .into();
        assert_eq!(s, expected);
    }

    #[test]
    fn quiet_market_adds_breakout_only_on_volume() {
        let sel = AdaptiveStrategySelector::default();
        let calm = sel.select(&conditions(MarketRegime::Sideways, 0.01, 0.0, 1.0));
        assert!(calm.contains(&StrategyId::BollingerBounce));
        assert!(!calm.contains(&StrategyId::BreakoutVolume));
        let busy = sel.select(&conditions(MarketRegime::Consolidation, 0.01, 0.0, 1.3));
        assert!(busy.contains(&StrategyId::BreakoutVolume));
    }

    #[test]
    fn volatile_prefers_breakouts() {
        let sel = AdaptiveStrategySelector::default();
        let s = sel.select(&conditions(MarketRegime::Volatile, 0.06, 0.0, 1.0));
        assert!(s.contains(&StrategyId::BreakoutVolume));
        assert!(s.contains(&StrategyId::MultiTimeframe));
        assert!(!s.contains(&StrategyId::BollingerBounce));
    }

    #[test]
    fn multi_timeframe_can_be_disabled() {
        let sel = AdaptiveStrategySelector::new(false);
        assert!(sel.select(&conditions(MarketRegime::Unknown, 0.02, 0.0, 1.0)).is_empty());
    }

    #[test]
    fn rr_ratio_is_bucket_times_regime() {
        let sel = AdaptiveStrategySelector::default();
        // MEDIUM bucket 2.0 × trending 1.2 × strong trend 1.1 × volume 1.05
        let rr = sel.adaptive_rr_ratio(&conditions(MarketRegime::BullishTrending, 0.03, 0.08, 1.6));
        assert!((rr - 2.0 * 1.2 * 1.1 * 1.05).abs() < 1e-9);
        // LOW bucket 1.5 × consolidation 0.8 clamps up to 1.5
        let rr = sel.adaptive_rr_ratio(&conditions(MarketRegime::Consolidation, 0.01, 0.0, 1.0));
        assert_eq!(rr, 1.5);
        // EXTREME 3.0 × volatile 1.3 clamps down to 4.0
        let rr = sel.adaptive_rr_ratio(&conditions(MarketRegime::Volatile, 0.2, 0.0, 2.0));
        assert_eq!(rr, 4.0);
    }

    #[test]
    fn sl_tp_bracket_entry_by_side() {
        let sel = AdaptiveStrategySelector::default();
        let c = conditions(MarketRegime::Sideways, 0.03, 0.0, 1.0);
        let (sl, tp) = sel.adaptive_sl_tp(100.0, Side::Buy, &c, 3.0).unwrap();
        assert!((sl - (100.0 - 3.6)).abs() < 1e-9);
        assert!((tp - (100.0 + 3.6 * 2.0)).abs() < 1e-9);
        let (sl, tp) = sel.adaptive_sl_tp(100.0, Side::Sell, &c, 3.0).unwrap();
        assert!(tp < 100.0 && 100.0 < sl);
    }

    #[test]
    fn sl_tp_needs_positive_atr_and_prices() {
        let sel = AdaptiveStrategySelector::default();
        let c = conditions(MarketRegime::Sideways, 0.03, 0.0, 1.0);
        assert_eq!(sel.adaptive_sl_tp(100.0, Side::Buy, &c, 0.0), None);
        assert_eq!(sel.adaptive_sl_tp(100.0, Side::Buy, &c, -1.0), None);
        assert_eq!(sel.adaptive_sl_tp(100.0, Side::Buy, &c, f64::NAN), None);
        assert_eq!(sel.adaptive_sl_tp(0.0, Side::Buy, &c, 3.0), None);
        // Stop would fall below zero.
        assert_eq!(sel.adaptive_sl_tp(100.0, Side::Buy, &c, 90.0), None);
    }

    #[test]
    fn trend_stops_are_tighter_than_volatile_stops() {
        let sel = AdaptiveStrategySelector::default();
        let trend = conditions(MarketRegime::BearishTrending, 0.03, 0.01, 1.0);
        let wild = conditions(MarketRegime::Volatile, 0.03, 0.0, 1.0);
        let (sl_t, _) = sel.adaptive_sl_tp(100.0, Side::Buy, &trend, 2.0).unwrap();
        let (sl_v, _) = sel.adaptive_sl_tp(100.0, Side::Buy, &wild, 2.0).unwrap();
        assert!(100.0 - sl_t < 100.0 - sl_v);
    }

    #[test]
    fn insights_grade_risk_by_volatility() {
        let sel = AdaptiveStrategySelector::default();
        assert_eq!(sel.insights(&conditions(MarketRegime::Sideways, 0.01, 0.0, 1.0)).risk_level, RiskLevel::Low);
        assert_eq!(sel.insights(&conditions(MarketRegime::Sideways, 0.03, 0.0, 1.0)).risk_level, RiskLevel::Medium);
        let hi = sel.insights(&conditions(MarketRegime::Volatile, 0.07, 0.0, 1.0));
        assert_eq!(hi.risk_level, RiskLevel::High);
        assert_eq!(hi.volatility_regime, VolatilityRegime::High);
    }
}
