pub mod config;
pub mod error;
pub mod notifier;
pub mod source;
pub mod types;

pub use config::{BotSettings, Config, PerformanceSettings, RiskSettings};
pub use error::{Error, Result};
pub use notifier::Notifier;
pub use source::MarketDataSource;
pub use types::*;
