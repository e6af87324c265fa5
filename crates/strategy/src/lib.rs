pub mod aggregator;
pub mod conditions;
pub mod config;
pub mod indicators;
pub mod registry;
pub mod selector;
pub mod strategies;

pub use aggregator::{AggregatorConfig, SignalAggregator};
pub use conditions::MarketConditionAnalyzer;
pub use config::StrategyParams;
pub use registry::StrategyRegistry;
pub use selector::{AdaptiveStrategySelector, MarketInsights, RiskLevel};

use common::{Candle, Result, SignalProposal, StrategyId};

/// All strategy implementations must satisfy this trait.
///
/// Implementations are pure: the same candles always give the same answer,
/// and the input slices are never mutated, so one snapshot can be shared by
/// every strategy in a cycle.
pub trait Strategy: Send + Sync {
    /// Identifier this implementation is bound to.
    fn id(&self) -> StrategyId;

    /// Evaluate the working-timeframe candles (oldest first), optionally with
    /// a higher-timeframe series for confirmation.
    ///
    /// Returns `Ok(None)` when there is no actionable setup or not enough
    /// history. Any proposal returned satisfies
    /// [`SignalProposal::is_well_formed`].
    fn evaluate(&self, candles: &[Candle], higher: Option<&[Candle]>) -> Result<Option<SignalProposal>>;
}
