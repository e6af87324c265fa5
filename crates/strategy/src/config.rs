use std::collections::HashMap;

/// Numeric parameters for one strategy, read from `[strategy_params.<ID>]`.
///
/// Example `config/bot.toml` fragment:
/// ```toml
/// [strategy_params.SUPERTREND_ATR]
/// period = 10
/// multiplier = 3.0
/// ```
#[derive(Debug, Clone, Default)]
pub struct StrategyParams {
    values: HashMap<String, toml::Value>,
}

impl StrategyParams {
    pub fn new(values: HashMap<String, toml::Value>) -> Self {
        Self { values }
    }

    /// Float parameter; integers are accepted too.
    pub fn f64(&self, key: &str, default: f64) -> f64 {
        match self.values.get(key) {
            Some(toml::Value::Float(f)) => *f,
            Some(toml::Value::Integer(i)) => *i as f64,
            _ => default,
        }
    }

    pub fn usize(&self, key: &str, default: usize) -> usize {
        self.values
            .get(key)
            .and_then(|v| v.as_integer())
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(default)
    }
}

impl From<HashMap<String, toml::Value>> for StrategyParams {
    fn from(values: HashMap<String, toml::Value>) -> Self {
        Self::new(values)
    }
}
