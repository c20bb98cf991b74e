//! Source handover strategies
//!
//! Both strategies implement [`ContinuityStrategy`] and are chosen once, when
//! the controller is built:
//!
//! - [`PersistentStrategy`]: one dual-input encoder reading two slot aliases;
//!   a switch re-points the inactive alias, waits for the encoder to pick it
//!   up on its next loop, then flips the active slot.
//! - [`HandoverStrategy`]: a switch spawns a second encoder with fade-in,
//!   lets both publish for the overlap window, then retires the old one.
//!
//! Every pacing wait observes a cancellation token so a forced stop can
//! preempt an in-flight switch.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, StrategyKind};
use crate::encode::{build_stream_args, CommandError, StreamCommandParams};
use crate::process::{
    ExitInfo, ProcessError, ProcessLauncher, ProcessSupervisor, TerminationOutcome,
};
use crate::switcher::{InputSlot, InputSwitcher, SwitchError};

/// How long to wait for the last stderr lines of a process that died on startup
const DEATH_TAIL_WAIT: Duration = Duration::from_millis(500);
const DEATH_TAIL_LINES: usize = 5;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Invalid encoder arguments: {0}")]
    Command(#[from] CommandError),

    #[error(transparent)]
    Input(#[from] SwitchError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("No encoder is running")]
    NotRunning,

    #[error("Operation cancelled")]
    Cancelled,
}

/// A freshly started encoder
#[derive(Debug)]
pub struct StartedProcess {
    pub pid: Option<u32>,
    pub diagnostics: Option<mpsc::Receiver<String>>,
}

/// Result of a completed switch
#[derive(Debug, Default)]
pub struct SwitchOutcome {
    /// Set when the switch replaced the encoder process
    pub replacement: Option<StartedProcess>,
    /// How the replaced encoder went away
    pub retired: Option<TerminationOutcome>,
}

/// One way of carrying out start / switch / stop
#[async_trait]
pub trait ContinuityStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Spawn the encoder for `source` and verify it survives the liveness probe
    async fn start(
        &mut self,
        source: &Path,
        restart_count: u32,
    ) -> Result<StartedProcess, StrategyError>;

    /// Move output to `new_source`. On error the previous source keeps playing if it can.
    async fn switch(
        &mut self,
        new_source: &Path,
        cancel: &CancellationToken,
    ) -> Result<SwitchOutcome, StrategyError>;

    /// Terminate the encoder and release strategy resources
    async fn stop(&mut self, force: bool) -> Result<TerminationOutcome, StrategyError>;

    /// Exit status of the current encoder, if it has exited
    fn poll_exit(&mut self) -> Option<ExitInfo>;

    fn active_pid(&self) -> Option<u32>;

    /// Slot table, for strategies that use aliases
    fn slots(&self) -> Option<&[InputSlot]> {
        None
    }
}

/// Build the strategy named in the configuration
pub fn build_strategy(
    cfg: Arc<Config>,
    launcher: Arc<dyn ProcessLauncher>,
) -> Box<dyn ContinuityStrategy> {
    match cfg.stream.strategy {
        StrategyKind::Handover => Box::new(HandoverStrategy::new(cfg, launcher)),
        StrategyKind::Persistent => Box::new(PersistentStrategy::new(cfg, launcher)),
    }
}

/// Sleep unless cancelled first
async fn pace(duration: Duration, cancel: &CancellationToken) -> Result<(), StrategyError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StrategyError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Spawn `argv`, probe it, and hand back its diagnostics.
/// A process that dies during the probe is reported with its last stderr lines.
async fn spawn_probed(
    supervisor: &mut ProcessSupervisor,
    argv: Vec<String>,
    restart_count: u32,
    probe_delay: Duration,
) -> Result<StartedProcess, StrategyError> {
    supervisor.spawn(argv, restart_count)?;
    let mut diagnostics = supervisor.take_diagnostics();

    if let Some(exit) = supervisor.probe(probe_delay).await {
        let stderr_tail = match diagnostics.as_mut() {
            Some(rx) => collect_tail(rx).await,
            None => String::new(),
        };
        supervisor.terminate(true).await?;
        return Err(ProcessError::DiedOnStartup { exit, stderr_tail }.into());
    }

    Ok(StartedProcess {
        pid: supervisor.pid(),
        diagnostics,
    })
}

/// Last lines of a dead process's stderr
async fn collect_tail(rx: &mut mpsc::Receiver<String>) -> String {
    let mut lines = Vec::new();
    let _ = tokio::time::timeout(DEATH_TAIL_WAIT, async {
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
    })
    .await;
    let skip = lines.len().saturating_sub(DEATH_TAIL_LINES);
    lines[skip..].join(" | ")
}

/// Long-running dual-input encoder fed through two slot aliases
pub struct PersistentStrategy {
    cfg: Arc<Config>,
    supervisor: ProcessSupervisor,
    switcher: InputSwitcher,
}

impl PersistentStrategy {
    pub fn new(cfg: Arc<Config>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let supervisor = ProcessSupervisor::new(launcher, cfg.process.termination_timeout());
        let switcher = InputSwitcher::new(cfg.stream.alias_dir.clone());
        Self {
            cfg,
            supervisor,
            switcher,
        }
    }

    pub fn switcher(&self) -> &InputSwitcher {
        &self.switcher
    }

    fn alias_paths(&self) -> [PathBuf; 2] {
        let slots = self.switcher.slots();
        [slots[0].alias.clone(), slots[1].alias.clone()]
    }
}

#[async_trait]
impl ContinuityStrategy for PersistentStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Persistent
    }

    async fn start(
        &mut self,
        source: &Path,
        restart_count: u32,
    ) -> Result<StartedProcess, StrategyError> {
        // Both slots show the same loop until the first switch
        self.switcher.cleanup();
        self.switcher.prepare_input(source, 0)?;
        self.switcher.prepare_input(source, 1)?;

        let params = StreamCommandParams::dual(
            self.alias_paths(),
            &self.cfg.stream.audio_url,
            &self.cfg.stream.endpoint,
        );
        let argv = build_stream_args(&self.cfg, &params)?;
        let started = spawn_probed(
            &mut self.supervisor,
            argv,
            restart_count,
            self.cfg.process.spawn_probe_delay(),
        )
        .await;
        if started.is_err() {
            self.switcher.cleanup();
        }
        started
    }

    async fn switch(
        &mut self,
        new_source: &Path,
        cancel: &CancellationToken,
    ) -> Result<SwitchOutcome, StrategyError> {
        if !self.supervisor.is_running() {
            return Err(StrategyError::NotRunning);
        }

        let slot = self.switcher.inactive_slot();
        self.switcher.prepare_input(new_source, slot)?;
        // The encoder only re-resolves the alias when it loops that input again
        pace(self.cfg.transition.preload(), cancel).await?;
        self.switcher.complete_switch(slot)?;
        pace(self.cfg.transition.crossfade(), cancel).await?;

        Ok(SwitchOutcome::default())
    }

    async fn stop(&mut self, force: bool) -> Result<TerminationOutcome, StrategyError> {
        let outcome = self.supervisor.terminate(force).await;
        self.switcher.cleanup();
        Ok(outcome?)
    }

    fn poll_exit(&mut self) -> Option<ExitInfo> {
        self.supervisor.poll_exit()
    }

    fn active_pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    fn slots(&self) -> Option<&[InputSlot]> {
        Some(self.switcher.slots().as_slice())
    }
}

/// Spawn-new / overlap / retire-old switching between single-input encoders
pub struct HandoverStrategy {
    cfg: Arc<Config>,
    launcher: Arc<dyn ProcessLauncher>,
    current: ProcessSupervisor,
}

impl HandoverStrategy {
    pub fn new(cfg: Arc<Config>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let current = ProcessSupervisor::new(launcher.clone(), cfg.process.termination_timeout());
        Self {
            cfg,
            launcher,
            current,
        }
    }

    fn new_supervisor(&self) -> ProcessSupervisor {
        ProcessSupervisor::new(self.launcher.clone(), self.cfg.process.termination_timeout())
    }
}

#[async_trait]
impl ContinuityStrategy for HandoverStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Handover
    }

    async fn start(
        &mut self,
        source: &Path,
        restart_count: u32,
    ) -> Result<StartedProcess, StrategyError> {
        let params = StreamCommandParams::from_config(&self.cfg, source, false);
        let argv = build_stream_args(&self.cfg, &params)?;
        spawn_probed(
            &mut self.current,
            argv,
            restart_count,
            self.cfg.process.spawn_probe_delay(),
        )
        .await
    }

    async fn switch(
        &mut self,
        new_source: &Path,
        cancel: &CancellationToken,
    ) -> Result<SwitchOutcome, StrategyError> {
        if !self.current.is_running() {
            return Err(StrategyError::NotRunning);
        }
        if !new_source.is_file() {
            return Err(SwitchError::SourceMissing(new_source.to_path_buf()).into());
        }

        let params = StreamCommandParams::from_config(&self.cfg, new_source, true);
        let argv = build_stream_args(&self.cfg, &params)?;
        let restart_count = self.current.handle().map(|h| h.restart_count).unwrap_or(0);

        let mut next = self.new_supervisor();
        let mut started = spawn_probed(
            &mut next,
            argv,
            restart_count,
            self.cfg.process.spawn_probe_delay(),
        )
        .await?;
        info!(pid = ?started.pid, source = %new_source.display(), "replacement encoder running");

        // Both encoders publish during the overlap
        if let Err(e) = pace(self.cfg.transition.overlap(), cancel).await {
            next.terminate(true).await?;
            return Err(e);
        }
        if let Some(exit) = next.poll_exit() {
            warn!(%exit, "replacement encoder died during overlap, keeping current");
            let stderr_tail = match started.diagnostics.as_mut() {
                Some(rx) => collect_tail(rx).await,
                None => String::new(),
            };
            next.terminate(true).await?;
            return Err(ProcessError::DiedOnStartup { exit, stderr_tail }.into());
        }

        let mut old = std::mem::replace(&mut self.current, next);
        let retired = match old.terminate(false).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "previous encoder did not terminate cleanly");
                None
            }
        };

        Ok(SwitchOutcome {
            replacement: Some(started),
            retired,
        })
    }

    async fn stop(&mut self, force: bool) -> Result<TerminationOutcome, StrategyError> {
        Ok(self.current.terminate(force).await?)
    }

    fn poll_exit(&mut self) -> Option<ExitInfo> {
        self.current.poll_exit()
    }

    fn active_pid(&self) -> Option<u32> {
        self.current.pid()
    }
}
