//! Rate limiting and duplicate suppression for outgoing signals, with a
//! JSON-file backed signal log that survives restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use common::{Error, RankedSignal, Result, RiskSettings, Side, StrategyId};

#[derive(Debug, Clone)]
pub struct SignalManagerConfig {
    pub min_confidence: f64,
    pub max_signals_per_hour: usize,
    pub max_signals_per_symbol: usize,
    /// Minimum time since the last recorded signal on any symbol.
    pub min_signal_gap: Duration,
    /// Same (symbol, side, strategy) is suppressed within this window.
    pub duplicate_window: Duration,
    /// Log entries older than this are pruned on write.
    pub retention: Duration,
    /// `None` keeps the log in memory only.
    pub log_path: Option<PathBuf>,
}

impl Default for SignalManagerConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            max_signals_per_hour: 3,
            max_signals_per_symbol: 2,
            min_signal_gap: Duration::minutes(15),
            duplicate_window: Duration::hours(2),
            retention: Duration::hours(24),
            log_path: None,
        }
    }
}

impl From<&RiskSettings> for SignalManagerConfig {
    fn from(s: &RiskSettings) -> Self {
        Self {
            min_confidence: s.min_confidence,
            max_signals_per_hour: s.max_signals_per_hour,
            max_signals_per_symbol: s.max_signals_per_symbol,
            min_signal_gap: Duration::minutes(s.min_signal_gap_minutes),
            log_path: Some(s.signal_log_path.clone()),
            ..Self::default()
        }
    }
}

/// One dispatched signal, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalLogEntry {
    pub symbol: String,
    pub side: Side,
    pub strategy: StrategyId,
    pub final_confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Why a signal was held back.
#[derive(Debug, Clone, PartialEq)]
pub enum Throttle {
    LowConfidence { confidence: f64 },
    HourlyCap { count: usize },
    SymbolCap { count: usize },
    TooSoon { since_last: Duration },
    Duplicate,
}

impl std::fmt::Display for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Throttle::LowConfidence { confidence } => write!(f, "confidence {confidence:.2} below threshold"),
            Throttle::HourlyCap { count } => write!(f, "{count} signals in the last hour"),
            Throttle::SymbolCap { count } => write!(f, "{count} signals for this symbol in the last hour"),
            Throttle::TooSoon { since_last } => {
                write!(f, "only {}m since the last signal", since_last.num_minutes())
            }
            Throttle::Duplicate => write!(f, "duplicate of a recent signal"),
        }
    }
}

pub struct SignalManager {
    config: SignalManagerConfig,
    log: Vec<SignalLogEntry>,
}

impl SignalManager {
    /// Empty log; nothing is read from disk.
    pub fn new(config: SignalManagerConfig) -> Self {
        Self { config, log: Vec::new() }
    }

    /// Restore the log from `config.log_path`. A missing or unreadable file
    /// starts an empty log.
    pub fn load(config: SignalManagerConfig) -> Self {
        Self::load_at(config, Utc::now())
    }

    pub fn load_at(config: SignalManagerConfig, now: DateTime<Utc>) -> Self {
        let mut log = match &config.log_path {
            Some(path) if path.exists() => match load_log(path) {
                Ok(entries) => {
                    info!(path = %path.display(), entries = entries.len(), "Signal log loaded");
                    entries
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Signal log unreadable, starting empty");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };
        let cutoff = now - config.retention;
        log.retain(|e| e.timestamp >= cutoff);
        Self { config, log }
    }

    pub fn config(&self) -> &SignalManagerConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: SignalManagerConfig) {
        info!(?config, "Signal manager config updated");
        self.config = config;
    }

    pub fn entries(&self) -> &[SignalLogEntry] {
        &self.log
    }

    /// Signals recorded in the trailing hour.
    pub fn signals_last_hour(&self, now: DateTime<Utc>) -> usize {
        self.log.iter().filter(|e| within(e, now, Duration::hours(1))).count()
    }

    pub fn should_send_signal(&self, signal: &RankedSignal) -> bool {
        self.should_send_signal_at(signal, Utc::now())
    }

    pub fn should_send_signal_at(&self, signal: &RankedSignal, now: DateTime<Utc>) -> bool {
        match self.check_at(signal, now) {
            Ok(()) => true,
            Err(reason) => {
                debug!(
                    symbol = %signal.symbol,
                    strategy = %signal.strategy(),
                    reason = %reason,
                    "Signal throttled"
                );
                false
            }
        }
    }

    /// Gates in order, stopping at the first failure. Has no side effects.
    pub fn check_at(&self, signal: &RankedSignal, now: DateTime<Utc>) -> std::result::Result<(), Throttle> {
        let cfg = &self.config;
        if signal.final_confidence < cfg.min_confidence {
            return Err(Throttle::LowConfidence { confidence: signal.final_confidence });
        }

        let hour = Duration::hours(1);
        let count = self.signals_last_hour(now);
        if count >= cfg.max_signals_per_hour {
            return Err(Throttle::HourlyCap { count });
        }

        let count = self
            .log
            .iter()
            .filter(|e| e.symbol == signal.symbol && within(e, now, hour))
            .count();
        if count >= cfg.max_signals_per_symbol {
            return Err(Throttle::SymbolCap { count });
        }

        if let Some(last) = self.log.iter().map(|e| e.timestamp).max() {
            let since_last = now - last;
            if since_last < cfg.min_signal_gap {
                return Err(Throttle::TooSoon { since_last });
            }
        }

        let duplicate = self.log.iter().any(|e| {
            e.symbol == signal.symbol
                && e.side == signal.side()
                && e.strategy == signal.strategy()
                && within(e, now, cfg.duplicate_window)
        });
        if duplicate {
            return Err(Throttle::Duplicate);
        }
        Ok(())
    }

    pub fn record_signal(&mut self, signal: &RankedSignal) {
        self.record_signal_at(signal, Utc::now());
    }

    /// Append, persist, then prune entries past retention. A failed write is
    /// logged and the in-memory log stays authoritative.
    pub fn record_signal_at(&mut self, signal: &RankedSignal, now: DateTime<Utc>) {
        self.log.push(SignalLogEntry {
            symbol: signal.symbol.clone(),
            side: signal.side(),
            strategy: signal.strategy(),
            final_confidence: signal.final_confidence,
            timestamp: now,
        });

        if let Some(path) = &self.config.log_path {
            if let Err(e) = save_log(path, &self.log) {
                error!(path = %path.display(), error = %e, "Failed to persist signal log");
            }
        }

        let cutoff = now - self.config.retention;
        self.log.retain(|e| e.timestamp >= cutoff);
    }
}

fn within(entry: &SignalLogEntry, now: DateTime<Utc>, window: Duration) -> bool {
    now - entry.timestamp < window
}

/// Read a signal log written by [`save_log`].
pub fn load_log(path: &Path) -> Result<Vec<SignalLogEntry>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write the log as a JSON array. Writes a sibling temp file and renames it
/// over the target so a crash never leaves a truncated log.
pub fn save_log(path: &Path, entries: &[SignalLogEntry]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
        .map_err(|e| Error::Persistence(format!("rename to {}: {e}", path.display())))?;
    Ok(())
}
