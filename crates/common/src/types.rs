use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar. Series are ordered by strictly increasing `open_time`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Direction of a proposed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for longs, -1 for shorts. Multiplying a price move by this gives the
    /// move in the trade's favour.
    pub fn direction(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Closed set of strategy adapters the bot knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyId {
    EmaVwap,
    SupertrendAtr,
    TrendMomentum,
    BreakoutVolume,
    MultiTimeframe,
    BollingerBounce,
}

impl StrategyId {
    pub const ALL: [StrategyId; 6] = [
        StrategyId::EmaVwap,
        StrategyId::SupertrendAtr,
        StrategyId::TrendMomentum,
        StrategyId::BreakoutVolume,
        StrategyId::MultiTimeframe,
        StrategyId::BollingerBounce,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyId::EmaVwap => "EMA_VWAP",
            StrategyId::SupertrendAtr => "SUPERTREND_ATR",
            StrategyId::TrendMomentum => "TREND_MOMENTUM",
            StrategyId::BreakoutVolume => "BREAKOUT_VOLUME",
            StrategyId::MultiTimeframe => "MULTI_TIMEFRAME",
            StrategyId::BollingerBounce => "BOLLINGER_BOUNCE",
        }
    }
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::Error::Config(format!("unknown strategy '{s}'")))
    }
}

/// Raw trade idea produced by one strategy adapter within a single cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalProposal {
    pub strategy: StrategyId,
    pub side: Side,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub suggested_size: f64,
    /// Strategy-reported confidence in [0, 1].
    pub confidence: f64,
}

impl SignalProposal {
    /// SL and TP sit on opposite sides of entry in the direction implied by
    /// `side`, all prices are finite and positive, and confidence is in [0, 1].
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.entry_price, self.stop_loss, self.take_profit];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return false;
        }
        match self.side {
            Side::Buy => self.stop_loss < self.entry_price && self.entry_price < self.take_profit,
            Side::Sell => self.take_profit < self.entry_price && self.entry_price < self.stop_loss,
        }
    }

    /// Take-profit distance over stop-loss distance.
    pub fn reward_risk_ratio(&self) -> f64 {
        let risk = (self.entry_price - self.stop_loss).abs();
        if risk == 0.0 {
            return 0.0;
        }
        (self.take_profit - self.entry_price).abs() / risk
    }
}

/// A proposal after market-condition scoring, bound to a symbol and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSignal {
    pub proposal: SignalProposal,
    pub final_confidence: f64,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
}

impl RankedSignal {
    pub fn side(&self) -> Side {
        self.proposal.side
    }

    pub fn strategy(&self) -> StrategyId {
        self.proposal.strategy
    }
}

/// Coarse market-state classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    BullishTrending,
    BearishTrending,
    Volatile,
    Sideways,
    Consolidation,
    Unknown,
}

impl MarketRegime {
    pub fn is_trending(self) -> bool {
        matches!(self, MarketRegime::BullishTrending | MarketRegime::BearishTrending)
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketRegime::BullishTrending => "BULLISH_TRENDING",
            MarketRegime::BearishTrending => "BEARISH_TRENDING",
            MarketRegime::Volatile => "VOLATILE",
            MarketRegime::Sideways => "SIDEWAYS",
            MarketRegime::Consolidation => "CONSOLIDATION",
            MarketRegime::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Volatility bucket of the ATR/price ratio. Breakpoints at 2%, 5% and 10%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolatilityRegime {
    Low,
    Medium,
    High,
    Extreme,
}

impl VolatilityRegime {
    pub fn from_volatility(volatility: f64) -> Self {
        if !volatility.is_finite() || volatility < 0.0 {
            return VolatilityRegime::Medium;
        }
        if volatility < 0.02 {
            VolatilityRegime::Low
        } else if volatility < 0.05 {
            VolatilityRegime::Medium
        } else if volatility < 0.10 {
            VolatilityRegime::High
        } else {
            VolatilityRegime::Extreme
        }
    }
}

impl std::fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VolatilityRegime::Low => "LOW",
            VolatilityRegime::Medium => "MEDIUM",
            VolatilityRegime::High => "HIGH",
            VolatilityRegime::Extreme => "EXTREME",
        };
        f.write_str(s)
    }
}

/// Per-cycle market context derived from a candle series. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    pub regime: MarketRegime,
    /// ATR / price.
    pub volatility: f64,
    pub trend_strength: f64,
    /// Current volume over its 20-period average.
    pub volume_ratio: f64,
    pub current_price: f64,
    /// 14-period average true range in price units.
    pub atr: f64,
}

impl MarketConditions {
    pub const DEFAULT_VOLATILITY: f64 = 0.02;

    /// Fail-soft result used when the series is too short to classify.
    pub fn unknown(current_price: f64) -> Self {
        Self {
            regime: MarketRegime::Unknown,
            volatility: Self::DEFAULT_VOLATILITY,
            trend_strength: 0.0,
            volume_ratio: 1.0,
            current_price,
            atr: current_price * Self::DEFAULT_VOLATILITY,
        }
    }

    pub fn volatility_regime(&self) -> VolatilityRegime {
        VolatilityRegime::from_volatility(self.volatility)
    }
}

/// Result of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    Win,
    Loss,
}

impl std::fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeOutcome::Win => write!(f, "win"),
            TradeOutcome::Loss => write!(f, "loss"),
        }
    }
}

/// Current state of the signal loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Halted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Halted => write!(f, "halted"),
        }
    }
}

/// Commands sent to the signal loop via the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Start,
    Stop,
    ResetDrawdown,
}

/// Why the risk gate refused a signal. Expected control flow, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    DailyDrawdown { daily_pnl_pct: f64 },
    DailyLossLimit { daily_loss: f64 },
    MaxDrawdown { drawdown_pct: f64 },
    LossStreak { losses: u32 },
    CorrelatedPosition { symbol: String, side: Side },
    HighRiskHour { hour: u32 },
}

impl RejectionReason {
    /// Whether this rejection halts all new signals until a reset or a new day.
    pub fn is_circuit_breaker(&self) -> bool {
        matches!(
            self,
            RejectionReason::DailyDrawdown { .. }
                | RejectionReason::DailyLossLimit { .. }
                | RejectionReason::MaxDrawdown { .. }
                | RejectionReason::LossStreak { .. }
        )
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::DailyDrawdown { daily_pnl_pct } => {
                write!(f, "daily drawdown breaker ({daily_pnl_pct:.2}%)")
            }
            RejectionReason::DailyLossLimit { daily_loss } => {
                write!(f, "daily loss limit reached ({daily_loss:.2})")
            }
            RejectionReason::MaxDrawdown { drawdown_pct } => {
                write!(f, "max drawdown breaker ({drawdown_pct:.2}%)")
            }
            RejectionReason::LossStreak { losses } => {
                write!(f, "{losses} consecutive losses")
            }
            RejectionReason::CorrelatedPosition { symbol, side } => {
                write!(f, "correlated {side} position open on {symbol}")
            }
            RejectionReason::HighRiskHour { hour } => write!(f, "high news-risk hour {hour:02}:00 UTC"),
        }
    }
}

/// Events emitted by the Risk Manager for the operator channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskEvent {
    TakeProfitTriggered {
        symbol: String,
        side: Side,
        strategy: StrategyId,
        close_price: f64,
        profit_pct: f64,
    },
    StopLossTriggered {
        symbol: String,
        side: Side,
        strategy: StrategyId,
        close_price: f64,
        profit_pct: f64,
    },
    CircuitBreakerTripped {
        reason: RejectionReason,
    },
    DrawdownHaltExited,
}
