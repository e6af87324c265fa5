use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use common::{MarketConditions, MarketRegime, Side, SignalProposal, StrategyId};
use strategy::aggregator::score;
use strategy::{AggregatorConfig, SignalAggregator, StrategyRegistry};

fn regime() -> impl Strategy<Value = MarketRegime> {
    prop_oneof![
        Just(MarketRegime::BullishTrending),
        Just(MarketRegime::BearishTrending),
        Just(MarketRegime::Volatile),
        Just(MarketRegime::Sideways),
        Just(MarketRegime::Consolidation),
        Just(MarketRegime::Unknown),
    ]
}

fn conditions() -> impl Strategy<Value = MarketConditions> {
    (regime(), 0.0f64..0.5, 0.0f64..1.0, 0.01f64..10.0).prop_map(|(regime, vol, trend, volume)| {
        MarketConditions {
            regime,
            volatility: vol,
            trend_strength: trend,
            volume_ratio: volume,
            current_price: 100.0,
            atr: 100.0 * vol,
        }
    })
}

fn proposal() -> impl Strategy<Value = SignalProposal> {
    (any::<bool>(), 0.0f64..=1.0, 0usize..6).prop_map(|(buy, confidence, idx)| {
        let (side, sl, tp) = if buy { (Side::Buy, 95.0, 110.0) } else { (Side::Sell, 105.0, 90.0) };
        SignalProposal {
            strategy: StrategyId::ALL[idx],
            side,
            entry_price: 100.0,
            stop_loss: sl,
            take_profit: tp,
            suggested_size: 0.001,
            confidence,
        }
    })
}

proptest! {
    /// Final confidence always lands in [0, 1].
    #[test]
    fn score_stays_in_unit_interval(p in proposal(), c in conditions()) {
        let s = score(&p, &c);
        prop_assert!((0.0..=1.0).contains(&s));
    }

    /// Output is sorted highest first and nothing below the floor survives.
    #[test]
    fn aggregate_is_sorted_and_floored(
        proposals in proptest::collection::vec(proposal(), 0..12),
        c in conditions(),
        floor in 0.0f64..1.0,
    ) {
        let agg = SignalAggregator::new(
            StrategyRegistry::default(),
            AggregatorConfig { min_confidence: floor, ..AggregatorConfig::default() },
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ranked = agg.aggregate("BTCUSDT", proposals, &c, now);
        prop_assert!(ranked.windows(2).all(|w| w[0].final_confidence >= w[1].final_confidence));
        prop_assert!(ranked.iter().all(|r| r.final_confidence >= floor));
    }
}
