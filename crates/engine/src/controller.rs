//! Continuity controller
//!
//! Top-level state machine for one output pipeline. Public operations run
//! one at a time under a single async lock. A background task ticks on a
//! fixed interval to poll encoder liveness and health, and drives bounded
//! recovery when the encoder dies while running.
//!
//! A forced stop first cancels the preemption token, so a switch or recovery
//! that is sleeping through its pacing gives the lock up promptly.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::encode::CommandError;
use crate::events::{EventDispatcher, EventSink, StreamEventKind, TracingSink};
use crate::log_monitor::{HealthIssue, LogMonitor, METRICS_STALE_AFTER};
use crate::process::{unix_timestamp_ms, ExitInfo, ProcessError, ProcessLauncher, TokioLauncher};
use crate::recovery::{RecoveryDecision, RecoveryPolicy};
use crate::status::{new_shared_status, publish_status, SharedStatus, StatusSnapshot, StreamState};
use crate::strategy::{build_strategy, ContinuityStrategy, StrategyError};

/// Errors in the status snapshot, newest last
const STATUS_RECENT_ERRORS: usize = 10;
/// stderr lines quoted in crash reports
const CRASH_TAIL_LINES: usize = 5;
const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(10);

/// Error type for controller operations
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Encoder launch failed: {0}")]
    Launch(String),

    #[error("Encoder unhealthy: {0}")]
    Health(#[from] HealthIssue),

    #[error("Encoder crashed: {0}")]
    Crash(String),

    #[error("Restart budget exhausted after {attempts} attempts")]
    RecoveryExhausted { attempts: u32 },

    #[error("Another switch is already in progress")]
    SwitchConflict,

    #[error("Encoder termination timed out: {0}")]
    TerminationTimeout(String),

    #[error("Cannot {op} while {state}")]
    InvalidState { op: &'static str, state: StreamState },

    #[error("No known source to restart from")]
    NoSource,

    #[error("Operation cancelled by a forced stop")]
    Cancelled,
}

impl From<StrategyError> for ControllerError {
    fn from(err: StrategyError) -> Self {
        match err {
            StrategyError::Command(CommandError::EmptySource) => {
                ControllerError::Input(CommandError::EmptySource.to_string())
            }
            StrategyError::Command(e) => ControllerError::Configuration(e.to_string()),
            StrategyError::Input(e) => ControllerError::Input(e.to_string()),
            StrategyError::Process(e @ ProcessError::Unresponsive { .. }) => {
                ControllerError::TerminationTimeout(e.to_string())
            }
            StrategyError::Process(e) => ControllerError::Launch(e.to_string()),
            StrategyError::NotRunning => {
                ControllerError::Crash("encoder is not running".to_string())
            }
            StrategyError::Cancelled => ControllerError::Cancelled,
        }
    }
}

/// Mutable pipeline state, only touched under the controller lock
struct ControllerCore {
    state: StreamState,
    strategy: Box<dyn ContinuityStrategy>,
    monitor: LogMonitor,
    recovery: RecoveryPolicy,
    /// The monitor task acts only while set
    monitoring: bool,
    current_source: Option<PathBuf>,
    pending_source: Option<PathBuf>,
    last_source: Option<PathBuf>,
    started_at: Option<(Instant, i64)>,
    switch_count: u64,
    last_error: Option<String>,
    health_degraded: bool,
}

struct Shared {
    cfg: Arc<Config>,
    core: Mutex<ControllerCore>,
    status: SharedStatus,
    events: EventDispatcher,
    switch_pending: AtomicBool,
    preempt: std::sync::Mutex<Option<CancellationToken>>,
}

/// Clears the pending-switch flag when the switch finishes, however it finishes
struct PendingSwitch<'a>(&'a AtomicBool);

impl Drop for PendingSwitch<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to one pipeline. Cheap to clone; all clones drive the same pipeline.
#[derive(Clone)]
pub struct ContinuityController {
    inner: Arc<Shared>,
}

impl ContinuityController {
    /// Build a controller and start its monitor task. Must run inside a tokio runtime.
    pub fn new(cfg: Config, launcher: Arc<dyn ProcessLauncher>, sink: Arc<dyn EventSink>) -> Self {
        let cfg = Arc::new(cfg);
        let strategy = build_strategy(cfg.clone(), launcher);
        let core = ControllerCore {
            state: StreamState::Stopped,
            strategy,
            monitor: LogMonitor::new(),
            recovery: RecoveryPolicy::from_config(&cfg.process),
            monitoring: false,
            current_source: None,
            pending_source: None,
            last_source: None,
            started_at: None,
            switch_count: 0,
            last_error: None,
            health_degraded: false,
        };

        let status = new_shared_status();
        if let Ok(mut snapshot) = status.try_write() {
            *snapshot = build_snapshot(&core);
        }

        let inner = Arc::new(Shared {
            cfg: cfg.clone(),
            core: Mutex::new(core),
            status,
            events: EventDispatcher::new(sink),
            switch_pending: AtomicBool::new(false),
            preempt: std::sync::Mutex::new(None),
        });

        let interval = cfg.process.monitor_interval().max(MIN_MONITOR_INTERVAL);
        tokio::spawn(monitor_loop(Arc::downgrade(&inner), interval));

        Self { inner }
    }

    /// Controller running the configured encoder binary, logging events through tracing
    pub fn from_config(cfg: Config) -> Self {
        let launcher = Arc::new(TokioLauncher::new(cfg.stream.ffmpeg_path.clone()));
        Self::new(cfg, launcher, Arc::new(TracingSink))
    }

    pub fn config(&self) -> &Config {
        &self.inner.cfg
    }

    /// Status cell shared with the status server
    pub fn status_handle(&self) -> SharedStatus {
        self.inner.status.clone()
    }

    /// Latest published snapshot. Never waits on the controller lock.
    pub async fn get_status(&self) -> StatusSnapshot {
        self.inner.status.read().await.clone()
    }

    pub async fn state(&self) -> StreamState {
        self.inner.status.read().await.state
    }

    /// Start streaming `source`. Requires Stopped.
    pub async fn start_stream(&self, source: impl AsRef<Path>) -> Result<(), ControllerError> {
        let source = source.as_ref().to_path_buf();
        let mut core = self.inner.core.lock().await;
        if core.state != StreamState::Stopped {
            return Err(ControllerError::InvalidState {
                op: "start",
                state: core.state,
            });
        }

        self.start_locked(&mut core, source, 0).await?;
        // A fresh administrative start gets a fresh restart budget
        core.recovery.reset();
        self.publish(&core).await;
        Ok(())
    }

    /// Move the stream to `new_source`. Requires Running; a second switch
    /// while one is in flight is rejected.
    pub async fn switch_track(&self, new_source: impl AsRef<Path>) -> Result<(), ControllerError> {
        let new_source = new_source.as_ref().to_path_buf();
        if self.inner.switch_pending.swap(true, Ordering::SeqCst) {
            warn!(source = %new_source.display(), "switch rejected, another switch in progress");
            let err = ControllerError::SwitchConflict;
            self.inner.events.emit(StreamEventKind::SwitchFailed {
                source: new_source,
                reason: err.to_string(),
            });
            return Err(err);
        }
        let _pending = PendingSwitch(&self.inner.switch_pending);

        let mut core = self.inner.core.lock().await;
        if core.state != StreamState::Running {
            return Err(ControllerError::InvalidState {
                op: "switch",
                state: core.state,
            });
        }

        let cancel = CancellationToken::new();
        self.set_preempt(Some(cancel.clone()));
        core.state = StreamState::Switching;
        core.pending_source = Some(new_source.clone());
        self.publish(&core).await;
        info!(
            from = ?core.current_source,
            to = %new_source.display(),
            strategy = %core.strategy.kind(),
            "switching track"
        );

        let old_pid = core.strategy.active_pid();
        let result = core.strategy.switch(&new_source, &cancel).await;
        self.set_preempt(None);
        core.pending_source = None;
        core.state = StreamState::Running;

        match result {
            Ok(outcome) => {
                if let Some(replacement) = outcome.replacement {
                    core.monitor.reset();
                    if let Some(rx) = replacement.diagnostics {
                        core.monitor.attach(rx);
                    }
                    core.health_degraded = false;
                }
                if outcome.retired.is_some_and(|o| o.escalated()) {
                    self.inner
                        .events
                        .emit(StreamEventKind::TerminationEscalated { pid: old_pid });
                }

                let from = core.current_source.replace(new_source.clone());
                core.last_source = Some(new_source.clone());
                core.switch_count += 1;
                info!(
                    source = %new_source.display(),
                    switch_count = core.switch_count,
                    pid = ?core.strategy.active_pid(),
                    "switch completed"
                );
                self.inner.events.emit(StreamEventKind::SwitchCompleted {
                    from,
                    to: new_source,
                    switch_count: core.switch_count,
                });
                self.publish(&core).await;
                Ok(())
            }
            Err(e) => {
                let err = ControllerError::from(e);
                warn!(source = %new_source.display(), error = %err, "switch failed");
                self.inner.events.emit(StreamEventKind::SwitchFailed {
                    source: new_source,
                    reason: err.to_string(),
                });
                core.last_error = Some(err.to_string());
                self.publish(&core).await;
                Err(err)
            }
        }
    }

    /// Stop the stream. A no-op when already stopped. `force` skips the
    /// graceful-stop signal and preempts an in-flight switch.
    pub async fn stop_stream(&self, force: bool) -> Result<(), ControllerError> {
        if force {
            self.cancel_preempt();
        }
        let mut core = self.inner.core.lock().await;
        self.stop_locked(&mut core, force).await
    }

    /// Forced stop, short pause, then start the last known source.
    /// Counts against the restart budget.
    pub async fn restart_stream(&self) -> Result<(), ControllerError> {
        let mut core = self.inner.core.lock().await;
        let source = core.last_source.clone().ok_or(ControllerError::NoSource)?;

        let attempt = match core.recovery.try_consume() {
            RecoveryDecision::Restart { attempt } => attempt,
            RecoveryDecision::Exhausted { attempts } => {
                return Err(ControllerError::RecoveryExhausted { attempts });
            }
            RecoveryDecision::Disabled => {
                return Err(ControllerError::RecoveryExhausted {
                    attempts: core.recovery.attempts(),
                });
            }
        };
        info!(attempt, source = %source.display(), "restarting stream");
        self.inner.events.emit(StreamEventKind::RestartAttempted {
            attempt,
            max_attempts: core.recovery.max_attempts(),
        });

        self.stop_locked(&mut core, true).await?;
        if !self.pause(core.recovery.delay()).await {
            return Err(ControllerError::Cancelled);
        }
        self.start_locked(&mut core, source, attempt).await
    }

    /// Current encoder health, as judged from its diagnostic output
    pub async fn check_health(&self) -> Result<(), ControllerError> {
        let mut core = self.inner.core.lock().await;
        core.monitor.drain();
        Ok(core.monitor.health_check()?)
    }

    async fn start_locked(
        &self,
        core: &mut MutexGuard<'_, ControllerCore>,
        source: PathBuf,
        restart_count: u32,
    ) -> Result<(), ControllerError> {
        core.state = StreamState::Starting;
        self.publish(core).await;
        info!(source = %source.display(), strategy = %core.strategy.kind(), "starting stream");

        match core.strategy.start(&source, restart_count).await {
            Ok(started) => {
                core.monitor.reset();
                if let Some(rx) = started.diagnostics {
                    core.monitor.attach(rx);
                }
                core.state = StreamState::Running;
                core.monitoring = true;
                core.current_source = Some(source.clone());
                core.last_source = Some(source);
                core.started_at = Some((Instant::now(), unix_timestamp_ms()));
                core.last_error = None;
                core.health_degraded = false;
                info!(pid = ?started.pid, "stream running");
                self.publish(core).await;
                Ok(())
            }
            Err(e) => {
                let err = ControllerError::from(e);
                // Nothing was ever spawned for bad input; only a launch failure is an Error state
                core.state = match err {
                    ControllerError::Input(_) | ControllerError::Configuration(_) => {
                        StreamState::Stopped
                    }
                    _ => StreamState::Error,
                };
                core.monitoring = false;
                core.current_source = None;
                core.started_at = None;
                core.last_error = Some(err.to_string());
                error!(error = %err, "stream start failed");
                if !matches!(err, ControllerError::Configuration(_)) {
                    self.inner.events.emit(StreamEventKind::StartFailed {
                        source,
                        reason: err.to_string(),
                    });
                }
                self.publish(core).await;
                Err(err)
            }
        }
    }

    async fn stop_locked(
        &self,
        core: &mut MutexGuard<'_, ControllerCore>,
        force: bool,
    ) -> Result<(), ControllerError> {
        if core.state == StreamState::Stopped {
            return Ok(());
        }
        core.monitoring = false;
        core.state = StreamState::Stopping;
        self.publish(core).await;

        let pid = core.strategy.active_pid();
        info!(pid = ?pid, force, "stopping stream");
        let result = core.strategy.stop(force).await;
        core.monitor.drain();

        core.state = StreamState::Stopped;
        core.current_source = None;
        core.pending_source = None;
        core.started_at = None;
        core.health_degraded = false;

        match result {
            Ok(outcome) => {
                if outcome.escalated() {
                    warn!(pid = ?pid, "encoder ignored graceful stop and was killed");
                    self.inner
                        .events
                        .emit(StreamEventKind::TerminationEscalated { pid });
                }
                self.publish(core).await;
                Ok(())
            }
            Err(e) => {
                let err = ControllerError::from(e);
                error!(error = %err, "stream stop failed");
                core.last_error = Some(err.to_string());
                self.publish(core).await;
                Err(err)
            }
        }
    }

    /// One monitoring tick: drain diagnostics, detect crashes, track health
    async fn monitor_tick(&self) {
        // A busy controller is mid-operation; try again next tick
        let Ok(mut core) = self.inner.core.try_lock() else {
            return;
        };
        core.monitor.drain();

        if core.monitoring && core.state == StreamState::Running {
            if let Some(exit) = core.strategy.poll_exit() {
                self.handle_crash(&mut core, exit).await;
            } else {
                self.check_health_transition(&mut core);
            }
        }
        self.publish(&core).await;
    }

    fn check_health_transition(&self, core: &mut ControllerCore) {
        let Some((started, _)) = core.started_at else {
            return;
        };
        // Give the encoder time to print its first progress line
        if started.elapsed() < METRICS_STALE_AFTER {
            return;
        }
        match core.monitor.health_check() {
            Ok(()) if core.health_degraded => {
                core.health_degraded = false;
                info!("encoder health recovered");
                self.inner.events.emit(StreamEventKind::HealthRecovered);
            }
            Err(issue) if !core.health_degraded => {
                core.health_degraded = true;
                warn!(reason = %issue, "encoder health degraded");
                core.last_error = Some(format!("health check failed: {}", issue));
                self.inner.events.emit(StreamEventKind::HealthDegraded {
                    reason: issue.to_string(),
                });
            }
            _ => {}
        }
    }

    async fn handle_crash(&self, core: &mut MutexGuard<'_, ControllerCore>, exit: ExitInfo) {
        let pid = core.strategy.active_pid();
        let stderr_tail = core.monitor.stderr_summary(CRASH_TAIL_LINES);
        let reason = if stderr_tail.is_empty() {
            format!("encoder exited unexpectedly ({})", exit)
        } else {
            format!("encoder exited unexpectedly ({}): {}", exit, stderr_tail)
        };
        error!(pid = ?pid, %exit, "{}", reason);

        core.state = StreamState::Error;
        core.monitoring = false;
        core.last_error = Some(ControllerError::Crash(reason).to_string());
        self.inner.events.emit(StreamEventKind::ProcessCrashed {
            pid,
            exit_code: exit.code,
            signal: exit.signal,
            stderr_tail,
        });

        self.recover_locked(core).await;
    }

    /// Restart until one start succeeds or the budget runs out
    async fn recover_locked(&self, core: &mut MutexGuard<'_, ControllerCore>) {
        let Some(source) = core.last_source.clone() else {
            return;
        };
        let preempt = CancellationToken::new();
        self.set_preempt(Some(preempt.clone()));

        loop {
            let attempt = match core.recovery.on_crash() {
                RecoveryDecision::Disabled => {
                    info!("automatic restart disabled, staying in error state");
                    break;
                }
                RecoveryDecision::Exhausted { attempts } => {
                    let err = ControllerError::RecoveryExhausted { attempts };
                    error!(attempts, "restart budget exhausted, staying in error state");
                    core.state = StreamState::Error;
                    core.last_error = Some(err.to_string());
                    self.inner
                        .events
                        .emit(StreamEventKind::RestartExhausted { attempts });
                    break;
                }
                RecoveryDecision::Restart { attempt } => attempt,
            };

            let max_attempts = core.recovery.max_attempts();
            warn!(attempt, max_attempts, "restarting crashed encoder");
            self.inner.events.emit(StreamEventKind::RestartAttempted {
                attempt,
                max_attempts,
            });

            if let Err(e) = core.strategy.stop(true).await {
                warn!(error = %e, "cleanup of crashed encoder failed");
            }
            let delay = core.recovery.delay();
            let preempted = tokio::select! {
                biased;
                _ = preempt.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if preempted {
                info!("recovery preempted by forced stop");
                break;
            }

            match self.start_locked(core, source.clone(), attempt).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(attempt, error = %e, "restart attempt failed");
                    core.state = StreamState::Error;
                }
            }
        }

        self.set_preempt(None);
        self.publish(core).await;
    }

    /// Sleep that a forced stop can cut short. Returns false when preempted.
    async fn pause(&self, delay: Duration) -> bool {
        let token = CancellationToken::new();
        self.set_preempt(Some(token.clone()));
        let completed = tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        };
        self.set_preempt(None);
        completed
    }

    fn set_preempt(&self, token: Option<CancellationToken>) {
        if let Ok(mut slot) = self.inner.preempt.lock() {
            *slot = token;
        }
    }

    fn cancel_preempt(&self) {
        if let Ok(slot) = self.inner.preempt.lock() {
            if let Some(token) = slot.as_ref() {
                token.cancel();
            }
        }
    }

    /// Snapshot is taken before returning; the future only borrows `self`
    fn publish(&self, core: &ControllerCore) -> impl Future<Output = ()> + Send + '_ {
        let snapshot = build_snapshot(core);
        publish_status(&self.inner.status, snapshot)
    }
}

fn build_snapshot(core: &ControllerCore) -> StatusSnapshot {
    let live = matches!(
        core.state,
        StreamState::Starting | StreamState::Running | StreamState::Switching | StreamState::Stopping
    );
    let health = match core.state {
        StreamState::Running | StreamState::Switching => core.monitor.health_check(),
        _ => Ok(()),
    };
    StatusSnapshot {
        state: core.state,
        strategy: core.strategy.kind(),
        active_pid: if live { core.strategy.active_pid() } else { None },
        current_source: core.current_source.clone(),
        pending_source: core.pending_source.clone(),
        started_at_unix_ms: core.started_at.map(|(_, ms)| ms),
        uptime_secs: core
            .started_at
            .map(|(at, _)| at.elapsed().as_secs_f64())
            .unwrap_or(0.0),
        switch_count: core.switch_count,
        restart_count: core.recovery.attempts(),
        max_restart_attempts: core.recovery.max_attempts(),
        healthy: core.state == StreamState::Running && health.is_ok(),
        health_issue: health.err().map(|issue| issue.to_string()),
        metrics: core.monitor.metrics().cloned(),
        recent_errors: core.monitor.recent_errors(STATUS_RECENT_ERRORS),
        last_error: core.last_error.clone(),
        stderr_tail: core.monitor.stderr_tail(),
        slots: core
            .strategy
            .slots()
            .map(|slots| slots.to_vec())
            .unwrap_or_default(),
        ..Default::default()
    }
}

/// Ticks until every controller handle is dropped
async fn monitor_loop(shared: Weak<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = shared.upgrade() else {
            break;
        };
        ContinuityController { inner }.monitor_tick().await;
    }
}
