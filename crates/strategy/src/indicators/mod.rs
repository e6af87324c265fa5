pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod supertrend;
pub mod volatility;
pub mod volume;

pub use macd::{MacdIndicator, MacdSignal};
pub use moving_average::{ema, ema_series, sma};
pub use rsi::{RsiIndicator, RsiZone};
pub use supertrend::{supertrend, SupertrendPoint};
pub use volatility::{atr, atr_series, bollinger, returns_stdev, true_range, BollingerBands};
pub use volume::{volume_ratio, vwap_series};
