use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, StrategyId};

/// Process-level configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_token: String,
    pub telegram_chat_ids: Vec<i64>,

    // Market data
    pub binance_base_url: String,

    // Bot settings file path
    pub bot_config_path: PathBuf,
}

impl Config {
    pub const DEFAULT_BINANCE_BASE_URL: &'static str = "https://api.binance.com";
    pub const DEFAULT_BOT_CONFIG_PATH: &'static str = "config/bot.toml";

    /// Load configuration for the live signal loop. Loads `.env` if present.
    /// Any missing or malformed required variable is a configuration error.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let telegram_chat_ids = parse_chat_ids(&required_env("TELEGRAM_CHAT_IDS")?)?;

        Ok(Config {
            telegram_token: required_env("TELEGRAM_TOKEN")?,
            telegram_chat_ids,
            binance_base_url: optional_env("BINANCE_BASE_URL")
                .unwrap_or_else(|| Self::DEFAULT_BINANCE_BASE_URL.to_string()),
            bot_config_path: bot_config_path(),
        })
    }
}

/// `BOT_CONFIG_PATH`, or the default location. The backtest command needs
/// this without the Telegram credentials.
pub fn bot_config_path() -> PathBuf {
    let _ = dotenvy::dotenv();
    optional_env("BOT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(Config::DEFAULT_BOT_CONFIG_PATH))
}

/// Base URL for the public market data endpoint.
pub fn binance_base_url() -> String {
    optional_env("BINANCE_BASE_URL").unwrap_or_else(|| Config::DEFAULT_BINANCE_BASE_URL.to_string())
}

pub fn parse_chat_ids(raw: &str) -> Result<Vec<i64>> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| Error::Config(format!("TELEGRAM_CHAT_IDS contains non-numeric ID: '{s}'")))
        })
        .collect::<Result<Vec<_>>>()?;
    if ids.is_empty() {
        return Err(Error::Config("TELEGRAM_CHAT_IDS is empty".into()));
    }
    Ok(ids)
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// ─── Bot settings file ────────────────────────────────────────────────────────

/// Static bot configuration read from TOML once at startup.
///
/// Example `config/bot.toml`:
/// ```toml
/// symbols = ["BTCUSDT", "ETHUSDT"]
/// interval = "15m"
/// active_strategies = ["EMA_VWAP", "TREND_MOMENTUM", "MULTI_TIMEFRAME"]
///
/// [risk_management]
/// max_signals_per_hour = 3
/// min_confidence = 0.6
///
/// [strategy_params.EMA_VWAP]
/// ema_period = 20
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    pub symbols: Vec<String>,
    pub interval: String,
    #[serde(default = "default_higher_interval")]
    pub higher_interval: String,
    pub active_strategies: Vec<StrategyId>,
    #[serde(default = "default_cycle_seconds")]
    pub cycle_seconds: u64,
    #[serde(default = "default_kline_limit")]
    pub kline_limit: usize,
    /// Recompute dispatched SL/TP from the selector's adaptive targets.
    #[serde(default = "default_true")]
    pub adaptive_targets: bool,
    #[serde(default)]
    pub risk_management: RiskSettings,
    #[serde(default)]
    pub performance: PerformanceSettings,
    #[serde(default)]
    pub strategy_params: HashMap<StrategyId, HashMap<String, toml::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub max_signals_per_hour: usize,
    pub max_signals_per_symbol: usize,
    pub min_signal_gap_minutes: i64,
    pub min_confidence: f64,
    /// Percent of balance risked per trade.
    pub max_risk_percent: f64,
    /// Percent, negative.
    pub max_daily_drawdown: f64,
    /// Percent, negative.
    pub max_drawdown: f64,
    /// Quote-currency amount; 0 disables the check.
    pub max_daily_loss: f64,
    pub max_consecutive_losses: u32,
    /// UTC hours in which no new signals are sent.
    pub high_risk_hours: Vec<u32>,
    pub initial_balance: f64,
    pub enable_multi_timeframe: bool,
    pub signal_log_path: PathBuf,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_signals_per_hour: 3,
            max_signals_per_symbol: 2,
            min_signal_gap_minutes: 15,
            min_confidence: 0.6,
            max_risk_percent: 1.0,
            max_daily_drawdown: -5.0,
            max_drawdown: -15.0,
            max_daily_loss: 0.0,
            max_consecutive_losses: 5,
            high_risk_hours: Vec::new(),
            initial_balance: 1000.0,
            enable_multi_timeframe: true,
            signal_log_path: PathBuf::from("data/signal_log.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub data_cache_minutes: u64,
    pub parallel_strategy_execution: bool,
    pub strategy_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_retries: u32,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            data_cache_minutes: 5,
            parallel_strategy_execution: true,
            strategy_timeout_secs: 10,
            fetch_timeout_secs: 10,
            fetch_retries: 3,
        }
    }
}

fn default_higher_interval() -> String {
    "1h".to_string()
}

fn default_cycle_seconds() -> u64 {
    300
}

fn default_kline_limit() -> usize {
    200
}

fn default_true() -> bool {
    true
}

impl BotSettings {
    /// Read, parse and validate the settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read bot config at '{}': {e}", path.display()))
        })?;
        let settings: BotSettings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let risk = &self.risk_management;
        if self.symbols.is_empty() {
            return Err(Error::Config("symbols must not be empty".into()));
        }
        if self.active_strategies.is_empty() {
            return Err(Error::Config("active_strategies must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&risk.min_confidence) {
            return Err(Error::Config(format!(
                "min_confidence must be within [0, 1], got {}",
                risk.min_confidence
            )));
        }
        if risk.max_daily_drawdown >= 0.0 || risk.max_drawdown >= 0.0 {
            return Err(Error::Config(
                "max_daily_drawdown and max_drawdown must be negative percentages".into(),
            ));
        }
        if risk.max_consecutive_losses == 0 {
            return Err(Error::Config(
                "max_consecutive_losses must be at least 1; 0 would block every signal".into(),
            ));
        }
        if risk.max_signals_per_hour == 0 || risk.max_signals_per_symbol == 0 {
            return Err(Error::Config(
                "max_signals_per_hour and max_signals_per_symbol must be at least 1".into(),
            ));
        }
        if self.cycle_seconds == 0 {
            return Err(Error::Config("cycle_seconds must be positive".into()));
        }
        if risk.initial_balance <= 0.0 {
            return Err(Error::Config("initial_balance must be positive".into()));
        }
        Ok(())
    }

    /// Parameter table for one strategy, empty if none configured.
    pub fn params_for(&self, id: StrategyId) -> HashMap<String, toml::Value> {
        self.strategy_params.get(&id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
symbols = ["BTCUSDT"]
interval = "15m"
active_strategies = ["EMA_VWAP", "MULTI_TIMEFRAME"]
"#;

    #[test]
    fn minimal_settings_take_defaults() {
        let s: BotSettings = toml::from_str(MINIMAL).unwrap();
        s.validate().unwrap();
        assert_eq!(s.higher_interval, "1h");
        assert_eq!(s.cycle_seconds, 300);
        assert_eq!(s.risk_management.max_signals_per_hour, 3);
        assert_eq!(s.risk_management.max_daily_drawdown, -5.0);
        assert!(s.performance.parallel_strategy_execution);
    }

    #[test]
    fn strategy_params_are_keyed_by_id() {
        let raw = format!("{MINIMAL}\n[strategy_params.EMA_VWAP]\nema_period = 30\n");
        let s: BotSettings = toml::from_str(&raw).unwrap();
        let params = s.params_for(StrategyId::EmaVwap);
        assert_eq!(params.get("ema_period").and_then(|v| v.as_integer()), Some(30));
        assert!(s.params_for(StrategyId::SupertrendAtr).is_empty());
    }

    #[test]
    fn unknown_strategy_is_a_parse_error() {
        let raw = MINIMAL.replace("EMA_VWAP", "RSI_MAGIC");
        assert!(toml::from_str::<BotSettings>(&raw).is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut s: BotSettings = toml::from_str(MINIMAL).unwrap();
        s.risk_management.min_confidence = 1.5;
        assert!(s.validate().is_err());

        let mut s: BotSettings = toml::from_str(MINIMAL).unwrap();
        s.risk_management.max_drawdown = 10.0;
        assert!(s.validate().is_err());

        let mut s: BotSettings = toml::from_str(MINIMAL).unwrap();
        s.symbols.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut s: BotSettings = toml::from_str(MINIMAL).unwrap();
        s.risk_management.max_consecutive_losses = 0;
        assert!(matches!(s.validate(), Err(Error::Config(_))));

        let mut s: BotSettings = toml::from_str(MINIMAL).unwrap();
        s.risk_management.max_signals_per_hour = 0;
        assert!(matches!(s.validate(), Err(Error::Config(_))));

        let mut s: BotSettings = toml::from_str(MINIMAL).unwrap();
        s.risk_management.max_signals_per_symbol = 0;
        assert!(matches!(s.validate(), Err(Error::Config(_))));

        let mut s: BotSettings = toml::from_str(MINIMAL).unwrap();
        s.risk_management.max_consecutive_losses = 1;
        s.risk_management.max_signals_per_hour = 1;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let s = BotSettings::load(&path).unwrap();
        assert_eq!(s.symbols, vec!["BTCUSDT".to_string()]);

        assert!(BotSettings::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn chat_ids_parse_and_reject_garbage() {
        assert_eq!(parse_chat_ids("1, -200,3").unwrap(), vec![1, -200, 3]);
        assert!(parse_chat_ids("12,abc").is_err());
        assert!(parse_chat_ids(" ").is_err());
    }
}
