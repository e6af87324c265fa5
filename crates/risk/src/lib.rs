pub mod correlation;
pub mod manager;
pub mod signal_manager;

pub use manager::{
    ActivePosition, RiskConfig, RiskDecision, RiskManager, RiskSnapshot, RiskState, TradeRecord,
    MAX_POSITION_SIZE, MIN_POSITION_SIZE,
};
pub use signal_manager::{SignalLogEntry, SignalManager, SignalManagerConfig, Throttle};
