use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use backtest::{fetch_windows, window, BacktestConfig, BacktestEngine, Overrides, RunSummary, Scenario, SweepPlan, SweepSummary};
use chrono::{DateTime, Utc};
use common::{config, BotSettings, Candle, Config, EngineCommand, StrategyId};
use engine::{BinanceKlines, Engine, SignalCycle};
use strategy::StrategyRegistry;
use telegram_ctrl::{start_bot, BotDeps, TelegramNotifier};

#[derive(Parser)]
#[command(name = "signalbot", version, about = "Crypto trading signal bot")]
struct Cli {
    /// Bot settings file. Defaults to BOT_CONFIG_PATH or config/bot.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live signal loop with Telegram control.
    Run {
        /// Wait for /start instead of starting immediately.
        #[arg(long)]
        paused: bool,
    },
    /// Replay historical candles through the strategies. Several symbols,
    /// intervals, windows or scenarios run as a sweep with a summary table.
    Backtest {
        #[arg(long, alias = "symbol", value_delimiter = ',', default_value = "BTCUSDT")]
        symbols: Vec<String>,
        /// Defaults to the configured interval.
        #[arg(long, alias = "interval", value_delimiter = ',')]
        intervals: Vec<String>,
        /// Day windows. Defaults to 30, or each scenario's own window.
        #[arg(long, value_delimiter = ',')]
        days: Vec<i64>,
        /// conservative, moderate or aggressive.
        #[arg(long = "scenario", value_delimiter = ',')]
        scenarios: Vec<Scenario>,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Defaults to the scenario's, else the configured min_confidence.
        #[arg(long)]
        min_confidence: Option<f64>,
        /// Fee per side, as a fraction. Defaults to the scenario's, else 0.001.
        #[arg(long)]
        fee: Option<f64>,
        /// Fraction of balance risked per trade.
        #[arg(long)]
        risk_per_trade: Option<f64>,
        /// Medium-volatility slippage as a fraction; other buckets scale with it.
        #[arg(long)]
        slippage: Option<f64>,
        /// Write the report (single run) or the summary (sweep) as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Save every run's full report into this directory.
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings_path = cli.config.unwrap_or_else(config::bot_config_path);
    let settings = BotSettings::load(&settings_path)
        .with_context(|| format!("loading bot settings from {}", settings_path.display()))?;

    match cli.command {
        Command::Run { paused } => run(settings, paused).await,
        Command::Backtest {
            symbols,
            intervals,
            days,
            scenarios,
            seed,
            min_confidence,
            fee,
            risk_per_trade,
            slippage,
            output,
            report_dir,
        } => {
            let plan = SweepPlan {
                symbols,
                intervals: if intervals.is_empty() { vec![settings.interval.clone()] } else { intervals },
                days: if days.is_empty() && scenarios.is_empty() { vec![30] } else { days },
                scenarios,
            };
            let base = BacktestConfig {
                initial_balance: settings.risk_management.initial_balance,
                min_confidence: settings.risk_management.min_confidence,
                seed,
                ..BacktestConfig::default()
            };
            let overrides = Overrides {
                risk_per_trade,
                slippage,
                fee_pct: fee,
                min_confidence,
            };
            backtest(settings, plan, base, overrides, output, report_dir).await
        }
    }
}

async fn run(settings: BotSettings, paused: bool) -> Result<()> {
    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("loading environment")?;
    info!(symbols = ?settings.symbols, interval = %settings.interval, "SignalBot starting");

    // ── Market data + notifications ───────────────────────────────────────────
    let source = Arc::new(binance(&cfg.binance_base_url, &settings)?);
    let bot = teloxide::Bot::new(cfg.telegram_token.clone());
    let notifier = Arc::new(TelegramNotifier::new(bot.clone(), &cfg.telegram_chat_ids));

    // ── Engine ────────────────────────────────────────────────────────────────
    let cycle = SignalCycle::from_settings(&settings, source, notifier).context("building signal cycle")?;
    let (engine, handle) = Engine::new(cycle, Duration::from_secs(settings.cycle_seconds));
    tokio::spawn(engine.run());

    if paused {
        info!("Engine paused. Send /start to begin.");
    } else {
        handle.send(EngineCommand::Start).await;
    }

    // ── Telegram control ──────────────────────────────────────────────────────
    let deps = BotDeps {
        engine: handle,
        allowed_chat_ids: Arc::new(cfg.telegram_chat_ids.clone()),
    };
    start_bot(bot, deps).await;
    info!("Shutdown signal received. Exiting.");
    Ok(())
}

async fn backtest(
    settings: BotSettings,
    plan: SweepPlan,
    base: BacktestConfig,
    overrides: Overrides,
    output: Option<PathBuf>,
    report_dir: Option<PathBuf>,
) -> Result<()> {
    let runs = plan.runs().context("planning backtest runs")?;
    let single = runs.len() == 1;
    let client = binance(&config::binance_base_url(), &settings)?;
    let registry = StrategyRegistry::from_settings(&settings).context("building strategies")?;
    let end = Utc::now();

    // ── History, once per (symbol, interval) ─────────────────────────────────
    let mut history = BTreeMap::new();
    for ((symbol, interval), days) in fetch_windows(&runs) {
        match fetch_series(&client, &settings, &symbol, &interval, end, days).await {
            Ok(series) => {
                history.insert((symbol, interval), series);
            }
            Err(e) if single => return Err(e),
            Err(e) => warn!(%symbol, %interval, error = %e, "Skipping runs without history"),
        }
    }

    // ── Runs ──────────────────────────────────────────────────────────────────
    let mut summaries = Vec::with_capacity(runs.len());
    for run in &runs {
        let Some((candles, higher)) = history.get(&(run.symbol.clone(), run.interval.clone())) else {
            continue;
        };
        let candles = window(candles, end, run.days);
        let higher = higher.as_deref().map(|h| window(h, end, run.days));
        let engine = BacktestEngine::new(registry.clone(), run.config(&base, &overrides));
        let report = match engine.run(candles, higher) {
            Ok(report) => report,
            Err(e) if single => return Err(e).context("running backtest"),
            Err(e) => {
                warn!(run = %run.label(), error = %e, "Backtest run failed");
                continue;
            }
        };
        info!(
            run = %run.label(),
            trades = report.total_trades,
            profit_pct = report.profit_pct,
            "Backtest run finished"
        );
        if let Some(dir) = &report_dir {
            let path = run.report_path(dir);
            report
                .save_json(&path)
                .with_context(|| format!("writing report to {}", path.display()))?;
        }
        if single {
            println!("{report}");
            if let Some(path) = &output {
                report
                    .save_json(path)
                    .with_context(|| format!("writing report to {}", path.display()))?;
                info!(path = %path.display(), "Report saved");
            }
            return Ok(());
        }
        summaries.push(RunSummary::new(run, &report));
    }

    anyhow::ensure!(!summaries.is_empty(), "no backtest run completed");
    let summary = SweepSummary::new(summaries);
    println!("{summary}");
    if let Some(path) = output {
        summary
            .save_json(&path)
            .with_context(|| format!("writing summary to {}", path.display()))?;
        info!(path = %path.display(), "Summary saved");
    }
    Ok(())
}

/// Candles for the last `days` before `end`, plus the higher timeframe when
/// multi-timeframe confirmation is active. A missing higher series only warns.
async fn fetch_series(
    client: &BinanceKlines,
    settings: &BotSettings,
    symbol: &str,
    interval: &str,
    end: DateTime<Utc>,
    days: i64,
) -> Result<(Vec<Candle>, Option<Vec<Candle>>)> {
    let start = end - chrono::Duration::days(days);
    info!(symbol, interval, days, "Fetching history");
    let candles = client
        .fetch_history(symbol, interval, start, end)
        .await
        .with_context(|| format!("fetching {symbol} {interval} candles"))?;

    let higher = if settings.active_strategies.contains(&StrategyId::MultiTimeframe) {
        match client
            .fetch_history(symbol, &settings.higher_interval, start, end)
            .await
        {
            Ok(h) => Some(h),
            Err(e) => {
                warn!(symbol, error = %e, "Higher timeframe unavailable, continuing without it");
                None
            }
        }
    } else {
        None
    };
    Ok((candles, higher))
}

fn binance(base_url: &str, settings: &BotSettings) -> Result<BinanceKlines> {
    let perf = &settings.performance;
    BinanceKlines::new(
        base_url,
        Duration::from_secs(perf.fetch_timeout_secs.max(1)),
        perf.fetch_retries,
    )
    .context("building Binance client")
}
