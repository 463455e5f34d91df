//! # Simulation Session
//!
//! Owned, explicitly started engine session. One task runs a cooperative
//! `select!` loop that interleaves:
//!
//! - the fixed-cadence simulation tick (elapsed time capped at `max_step`)
//! - inbound host messages
//! - completion or watchdog expiry of the active harness run
//! - shutdown
//!
//! Control input is last-write-wins: each `UPDATE_CONTROL` replaces the
//! pending control and the next tick reads whatever is newest. Engine errors
//! never cross the boundary; they become `LOG` messages.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{validate_control, ChannelError, EngineMessage, HostMessage};
use crate::config::Config;
use crate::controller::{ContactorEvent, PackEngine, TickOutcome};
use crate::domain::{ControlInput, ControlPatch, FaultDirective, FaultSet};
use crate::harness::{HarnessReport, TestHarness, Watchdog};

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inbound: UnboundedSender<HostMessage>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    /// Queue a host message for the session loop.
    pub fn send(&self, message: HostMessage) -> Result<(), ChannelError> {
        self.inbound.send(message).map_err(|_| ChannelError::Closed)
    }

    pub fn update_control(&self, patch: ControlPatch) -> Result<(), ChannelError> {
        self.send(HostMessage::UpdateControl(patch))
    }

    pub fn run_tests(&self) -> Result<(), ChannelError> {
        self.send(HostMessage::RunTests)
    }

    pub fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }

    /// Cancel the loop and wait for it to exit. Later calls return at once.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "session task ended abnormally");
            }
        }
    }
}

/// Outbound message stream of a session.
#[derive(Debug)]
pub struct EngineEvents {
    rx: UnboundedReceiver<EngineMessage>,
}

impl EngineEvents {
    pub async fn recv(&mut self) -> Option<EngineMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EngineMessage> {
        self.rx.try_recv().ok()
    }
}

pub struct Session;

impl Session {
    /// Spawn the session loop on the current runtime.
    ///
    /// With `simulation.auto_start` the engine starts immediately; otherwise
    /// the session idles until `INIT`.
    pub fn start(config: Config) -> (SessionHandle, EngineEvents) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let session = SessionLoop::new(config, outbound_tx);
        let task = tokio::spawn(session.run(inbound_rx, shutdown.clone()));

        let handle = SessionHandle {
            inbound: inbound_tx,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        };
        (handle, EngineEvents { rx: outbound_rx })
    }
}

enum EngineStatus {
    Idle,
    Running(Box<PackEngine>),
    Failed,
}

struct ActiveRun {
    task: JoinHandle<HarnessReport>,
    watchdog: Watchdog,
}

enum RunEvent {
    Finished(Result<HarnessReport, JoinError>),
    TimedOut,
}

async fn next_run_event(active: &mut Option<ActiveRun>) -> RunEvent {
    match active {
        Some(run) => {
            tokio::select! {
                result = &mut run.task => RunEvent::Finished(result),
                _ = run.watchdog.fired() => RunEvent::TimedOut,
            }
        }
        None => std::future::pending().await,
    }
}

struct SessionLoop {
    config: Config,
    status: EngineStatus,
    control: ControlInput,
    previous_faults: FaultSet,
    outbound: UnboundedSender<EngineMessage>,
}

impl SessionLoop {
    fn new(config: Config, outbound: UnboundedSender<EngineMessage>) -> Self {
        Self {
            config,
            status: EngineStatus::Idle,
            control: ControlInput::default(),
            previous_faults: FaultSet::empty(),
            outbound,
        }
    }

    async fn run(mut self, mut inbound: UnboundedReceiver<HostMessage>, shutdown: CancellationToken) {
        let period = self.config.simulation.tick_period();
        let max_step = self.config.simulation.max_step();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();
        let mut active: Option<ActiveRun> = None;

        info!(tick_ms = period.as_millis() as u64, "session loop started");

        if self.config.simulation.auto_start {
            self.startup();
            last_tick = Instant::now();
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(HostMessage::Init) => {
                        if matches!(self.status, EngineStatus::Idle) {
                            self.startup();
                            last_tick = Instant::now();
                        } else {
                            debug!("INIT ignored; engine already started");
                        }
                    }
                    Some(HostMessage::UpdateControl(patch)) => self.apply_control(patch),
                    Some(HostMessage::RunTests) => self.start_run(&mut active),
                    None => {
                        debug!("all session handles dropped");
                        break;
                    }
                },
                event = next_run_event(&mut active) => {
                    if let Some(run) = active.take() {
                        self.finish_run(run, event);
                    }
                }
                now = ticker.tick() => {
                    let dt = now.saturating_duration_since(last_tick).min(max_step);
                    last_tick = now;
                    self.on_tick(dt);
                }
            }
        }

        if let Some(run) = active.take() {
            run.watchdog.disarm();
            run.task.abort();
        }
        info!("session loop stopped");
    }

    fn emit(&self, message: EngineMessage) {
        if self.outbound.send(message).is_err() {
            debug!("engine event dropped; no receiver");
        }
    }

    /// Fail-fast: an invalid configuration is terminal for the session.
    fn startup(&mut self) {
        let engine = PackEngine::new(self.config.pack.clone(), self.config.safety.clone());
        match engine {
            Ok(engine) => {
                self.previous_faults = engine.state().faults.clone();
                self.status = EngineStatus::Running(Box::new(engine));
                info!("engine ready");
                self.emit(EngineMessage::Ready);
                self.emit(EngineMessage::info("BMS engine online"));
            }
            Err(err) => {
                error!(error = %err, "engine startup failed");
                self.status = EngineStatus::Failed;
                self.emit(EngineMessage::error(format!("Engine startup failed: {err}")));
            }
        }
    }

    fn apply_control(&mut self, patch: ControlPatch) {
        if let Err(err) = validate_control(&patch) {
            warn!(error = %err, "control update dropped");
            self.emit(EngineMessage::warn(format!("Control update dropped: {err}")));
            return;
        }
        debug!(?patch, "control updated");
        self.control = patch.into_control();
    }

    fn on_tick(&mut self, dt: Duration) {
        let EngineStatus::Running(engine) = &mut self.status else {
            return;
        };

        let control = self.control.clone();
        self.control.inject_fault = None;
        let bypass_before = engine.bypass_active();

        let result = panic::catch_unwind(AssertUnwindSafe(|| engine.tick(&control, dt)));
        match result {
            Ok(Ok(outcome)) => self.publish(outcome, bypass_before),
            Ok(Err(err)) => {
                warn!(error = %err, dt_s = dt.as_secs_f64(), "tick skipped");
                self.emit(EngineMessage::error(format!("Tick skipped: {err}")));
            }
            Err(_) => {
                error!(dt_s = dt.as_secs_f64(), "tick panicked; skipped");
                self.emit(EngineMessage::error("Tick skipped: internal error"));
            }
        }
    }

    /// Boundary logging for one committed tick, then the `TICK` itself.
    fn publish(&mut self, outcome: TickOutcome, bypass_before: bool) {
        let TickOutcome {
            state,
            evaluation,
            contactor,
            directive,
        } = outcome;

        match directive {
            Some(FaultDirective::Sabotage) if !bypass_before => {
                warn!("safety bypass enabled");
                self.emit(EngineMessage::warn(
                    "SABOTAGE: safety bypass active, contactors will not open on faults",
                ));
            }
            Some(FaultDirective::Reset) if bypass_before => {
                info!("safety bypass cleared");
                self.emit(EngineMessage::info("Safety bypass cleared"));
            }
            Some(d) if d.injected_fault().is_some() => {
                info!(directive = ?d, "fault injected");
            }
            _ => {}
        }

        for code in state.faults.newly_raised(&self.previous_faults) {
            let detail = evaluation
                .violations
                .iter()
                .find(|v| v.code == code)
                .map(|v| v.message.clone())
                .unwrap_or_default();
            error!(fault = %code, %detail, "fault raised");
            self.emit(EngineMessage::error(format!("FAULT: {code} - {detail}")));
        }
        self.previous_faults = state.faults.clone();

        match contactor {
            ContactorEvent::Opened => {
                error!(faults = %state.faults, "contactors opened");
                self.emit(EngineMessage::error(format!(
                    "Contactors OPEN: {}",
                    state.faults
                )));
            }
            ContactorEvent::Reclosed => {
                info!("contactors reclosed after reset");
                self.emit(EngineMessage::success("Reset accepted: contactors closed"));
            }
            ContactorEvent::ResetRejected => {
                warn!(faults = %state.faults, "reset rejected");
                self.emit(EngineMessage::warn(format!(
                    "Reset rejected: faults still active ({})",
                    state.faults
                )));
            }
            ContactorEvent::Unchanged => {}
        }

        match EngineMessage::tick(state) {
            Ok(tick) => self.emit(tick),
            Err(err) => {
                warn!(error = %err, "telemetry snapshot dropped");
                self.emit(EngineMessage::warn(format!("Telemetry dropped: {err}")));
            }
        }
    }

    fn start_run(&mut self, active: &mut Option<ActiveRun>) {
        if active.is_some() {
            warn!("RUN_TESTS ignored; run already in progress");
            self.emit(EngineMessage::warn("Test run already in progress; request ignored"));
            return;
        }
        let EngineStatus::Running(engine) = &self.status else {
            warn!("RUN_TESTS ignored; engine not running");
            self.emit(EngineMessage::warn("Engine not ready; test run ignored"));
            return;
        };

        let bypass = engine.bypass_active();
        if bypass {
            warn!("test run started with safety bypass active");
        }
        let harness = TestHarness::new(
            self.config.pack.clone(),
            self.config.safety.clone(),
            self.config.harness.clone(),
        );
        let watchdog = Watchdog::arm(self.config.harness.watchdog_timeout());
        self.emit(EngineMessage::info("Starting test run"));
        let task = tokio::spawn(harness.run(bypass, self.outbound.clone()));
        *active = Some(ActiveRun { task, watchdog });
    }

    fn finish_run(&mut self, run: ActiveRun, event: RunEvent) {
        run.watchdog.disarm();
        match event {
            RunEvent::Finished(Ok(report)) => {
                let summary = &report.summary;
                let text = format!(
                    "Tests complete: {}/{} passed ({})",
                    summary.passed, summary.total, summary.pass_rate
                );
                if report.all_passed() {
                    self.emit(EngineMessage::success(text));
                } else {
                    self.emit(EngineMessage::warn(text));
                }
                self.emit(EngineMessage::TestReport(report));
            }
            RunEvent::Finished(Err(err)) => {
                error!(error = %err, "test run aborted");
                self.emit(EngineMessage::error(format!("Test run aborted: {err}")));
            }
            RunEvent::TimedOut => {
                run.task.abort();
                let timeout_ms = run.watchdog.timeout().as_millis() as u64;
                warn!(timeout_ms, "watchdog released test run lock");
                self.emit(EngineMessage::warn(format!(
                    "Watchdog: test run exceeded {timeout_ms} ms; lock released"
                )));
            }
        }
        self.emit(EngineMessage::TestComplete);
    }
}
