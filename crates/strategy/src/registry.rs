use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use common::{BotSettings, Result, StrategyId};

use crate::config::StrategyParams;
use crate::strategies::{
    BollingerBounce, BreakoutVolume, EmaVwap, MultiTimeframe, SupertrendAtr, TrendMomentum,
};
use crate::Strategy;

/// Strategy instances bound at startup, one per active identifier.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<StrategyId, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Build every strategy listed in `active_strategies`, with its parameter table.
    pub fn from_settings(settings: &BotSettings) -> Result<Self> {
        let mut registry = Self::default();
        for &id in &settings.active_strategies {
            let params = StrategyParams::from(settings.params_for(id));
            let strategy = build_strategy(id, &params)?;
            info!(strategy = %id, "Registered strategy");
            registry.insert(strategy);
        }
        Ok(registry)
    }

    /// Every known strategy with default parameters.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::default();
        for id in StrategyId::ALL {
            registry.insert(build_strategy(id, &StrategyParams::default())?);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.id(), strategy);
    }

    pub fn get(&self, id: StrategyId) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(&id).cloned()
    }

    pub fn contains(&self, id: StrategyId) -> bool {
        self.strategies.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = StrategyId> + '_ {
        self.strategies.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

// ─── Strategy builders ────────────────────────────────────────────────────────

pub fn build_strategy(id: StrategyId, params: &StrategyParams) -> Result<Arc<dyn Strategy>> {
    Ok(match id {
        StrategyId::EmaVwap => Arc::new(EmaVwap::new(params)?),
        StrategyId::SupertrendAtr => Arc::new(SupertrendAtr::new(params)?),
        StrategyId::TrendMomentum => Arc::new(TrendMomentum::new(params)?),
        StrategyId::BreakoutVolume => Arc::new(BreakoutVolume::new(params)?),
        StrategyId::MultiTimeframe => Arc::new(MultiTimeframe::new(params)?),
        StrategyId::BollingerBounce => Arc::new(BollingerBounce::new(params)?),
    })
}
