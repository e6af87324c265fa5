pub mod alert;
pub mod binance;
pub mod cache;
pub mod cycle;
pub mod lifecycle;

#[cfg(test)]
pub(crate) mod testing;

pub use binance::BinanceKlines;
pub use cache::MarketDataCache;
pub use cycle::{CycleReport, CycleSettings, SignalCycle, SymbolOutcome};
pub use lifecycle::{Engine, EngineHandle, EngineStatus};
