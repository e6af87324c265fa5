use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

use common::{EngineCommand, EngineState, RiskEvent};
use risk::RiskSnapshot;
use strategy::MarketInsights;

use crate::alert;
use crate::cycle::{CycleReport, SignalCycle};

/// Read-only view of the loop for the operator channel.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub risk: RiskSnapshot,
    pub signals_last_hour: usize,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub markets: BTreeMap<String, MarketInsights>,
}

/// Cloneable handle passed to other crates (Telegram, CLI).
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
    status: Arc<RwLock<EngineStatus>>,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub async fn status(&self) -> EngineStatus {
        self.status.read().await.clone()
    }
}

enum Wake {
    Command(Option<EngineCommand>),
    Tick,
}

/// How an in-flight cycle ended.
enum CycleRun {
    /// Finished; commands other than Stop that arrived meanwhile, in order.
    Completed(CycleReport, Vec<EngineCommand>),
    /// Abandoned on a Stop.
    Stopped,
    Closed,
}

/// The signal loop: runs a cycle, then sleeps until the next one while
/// staying responsive to operator commands.
///
/// A Stop abandons the cycle in flight at its next await point (a candle
/// fetch, a retry backoff or a strategy wait). Gate and record for a signal
/// happen with no await between them, so an abandoned cycle never leaves a
/// signal approved but unrecorded.
///
/// Runs until every `EngineHandle` is dropped.
pub struct Engine {
    cycle: SignalCycle,
    period: Duration,
    cycles: u64,
    last_cycle_at: Option<DateTime<Utc>>,
    state: Arc<RwLock<EngineState>>,
    status: Arc<RwLock<EngineStatus>>,
    command_rx: mpsc::Receiver<EngineCommand>,
}

impl Engine {
    pub fn new(cycle: SignalCycle, period: Duration) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(EngineState::Stopped));
        let status = Arc::new(RwLock::new(EngineStatus {
            state: EngineState::Stopped,
            risk: cycle.risk().snapshot(),
            signals_last_hour: cycle.signals().signals_last_hour(Utc::now()),
            cycles: 0,
            last_cycle_at: None,
            markets: BTreeMap::new(),
        }));

        let handle = EngineHandle {
            command_tx,
            state: state.clone(),
            status: status.clone(),
        };

        let engine = Engine {
            cycle,
            period,
            cycles: 0,
            last_cycle_at: None,
            state,
            status,
            command_rx,
        };

        (engine, handle)
    }

    /// Run the engine. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            symbols = ?self.cycle.settings().symbols,
            period = ?self.period,
            "Engine initialized in Stopped state. Waiting for Start command."
        );

        loop {
            if *self.state.read().await == EngineState::Stopped {
                match self.command_rx.recv().await {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                }
                continue;
            }

            match self.run_interruptible().await {
                CycleRun::Completed(report, deferred) => {
                    self.finish_cycle(report).await;
                    for cmd in deferred {
                        self.handle_command(cmd).await;
                    }
                    if *self.state.read().await == EngineState::Stopped {
                        continue;
                    }
                }
                CycleRun::Stopped => {
                    info!("Stop received mid-cycle, abandoning cycle");
                    self.handle_command(EngineCommand::Stop).await;
                    continue;
                }
                CycleRun::Closed => {
                    warn!("Engine command channel closed mid-cycle, shutting down");
                    return;
                }
            }

            let deadline = Instant::now() + self.period;
            loop {
                let wake = tokio::select! {
                    cmd = self.command_rx.recv() => Wake::Command(cmd),
                    _ = tokio::time::sleep_until(deadline) => Wake::Tick,
                };
                match wake {
                    Wake::Tick => break,
                    Wake::Command(Some(cmd)) => {
                        self.handle_command(cmd).await;
                        if *self.state.read().await == EngineState::Stopped {
                            break;
                        }
                    }
                    Wake::Command(None) => {
                        warn!("Engine command channel closed, shutting down");
                        return;
                    }
                }
            }
        }
        info!("Engine command channel closed, shutting down");
    }

    async fn set_state(&self, state: EngineState) {
        *self.state.write().await = state;
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        let current = *self.state.read().await;
        match cmd {
            EngineCommand::Start => {
                if current == EngineState::Stopped {
                    info!("Engine starting");
                    self.set_state(EngineState::Running).await;
                } else {
                    info!(state = %current, "Engine already started");
                }
            }
            EngineCommand::Stop => {
                info!("Engine stopping");
                self.set_state(EngineState::Stopped).await;
            }
            EngineCommand::ResetDrawdown => {
                if current == EngineState::Halted {
                    let event = self.cycle.risk_mut().reset_drawdown();
                    self.cycle.notify(alert::event_message(&event));
                    info!("Drawdown reset, engine resuming");
                    self.set_state(EngineState::Running).await;
                } else {
                    warn!(state = %current, "ResetDrawdown received but engine is not halted");
                }
            }
        }
        self.publish().await;
    }

    /// Run one cycle while still reading commands. Start and ResetDrawdown
    /// need the cycle's state, so they wait until it finishes.
    async fn run_interruptible(&mut self) -> CycleRun {
        let mut deferred = Vec::new();
        let cycle = self.cycle.run_once();
        tokio::pin!(cycle);
        loop {
            tokio::select! {
                report = &mut cycle => return CycleRun::Completed(report, deferred),
                cmd = self.command_rx.recv() => match cmd {
                    Some(EngineCommand::Stop) => return CycleRun::Stopped,
                    Some(cmd) => deferred.push(cmd),
                    None => return CycleRun::Closed,
                },
            }
        }
    }

    async fn finish_cycle(&mut self, report: CycleReport) {
        self.cycles += 1;
        self.last_cycle_at = Some(Utc::now());

        let current = *self.state.read().await;
        if let Some(reason) = report.circuit_breaker() {
            if current == EngineState::Running {
                warn!(%reason, "Circuit breaker tripped, halting signals");
                self.set_state(EngineState::Halted).await;
                self.cycle.notify(alert::event_message(&RiskEvent::CircuitBreakerTripped {
                    reason: reason.clone(),
                }));
            }
        } else if current == EngineState::Halted && report.risk_approved() {
            info!("Circuit breaker cleared, engine resuming");
            self.set_state(EngineState::Running).await;
            self.cycle.notify(alert::event_message(&RiskEvent::DrawdownHaltExited));
        }

        info!(
            cycle = self.cycles,
            symbols = report.outcomes.len(),
            dispatched = report.dispatched(),
            "Analysis cycle complete"
        );
        self.publish().await;
    }

    async fn publish(&self) {
        let status = EngineStatus {
            state: *self.state.read().await,
            risk: self.cycle.risk().snapshot(),
            signals_last_hour: self.cycle.signals().signals_last_hour(Utc::now()),
            cycles: self.cycles,
            last_cycle_at: self.last_cycle_at,
            markets: self.cycle.insights().clone(),
        };
        *self.status.write().await = status;
    }
}
