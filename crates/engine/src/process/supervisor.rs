//! Encoder process supervision
//!
//! A [`ProcessSupervisor`] owns at most one running encoder. It spawns it,
//! exposes its diagnostic lines, and tears it down with the
//! graceful-then-forced protocol. No wait on process exit is ever unbounded.

use super::platform::{DiagnosticStream, ExitInfo, PlatformProcess, ProcessLauncher, Signal};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bounded wait after a forced kill
pub const FORCE_KILL_GRACE: Duration = Duration::from_secs(5);

/// Buffered diagnostic lines per process before new lines are dropped
pub const DIAGNOSTIC_CHANNEL_CAPACITY: usize = 1024;

/// Longest diagnostic line kept; longer runs are split
const MAX_LINE_BYTES: usize = 4096;

/// Error type for process supervision
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The binary could not be started
    #[error("Failed to launch encoder: {0}")]
    Launch(#[source] io::Error),

    /// The process died during the post-spawn liveness probe
    #[error("Encoder exited right after spawn ({exit}): {stderr_tail}")]
    DiedOnStartup { exit: ExitInfo, stderr_tail: String },

    /// The supervisor already owns a live process
    #[error("Supervisor already owns running process {0:?}")]
    AlreadyRunning(Option<u32>),

    /// No process to act on
    #[error("No encoder process is running")]
    NotRunning,

    /// Sending a signal failed
    #[error("Failed to signal process {pid:?}: {source}")]
    Signal {
        pid: Option<u32>,
        #[source]
        source: io::Error,
    },

    /// The process survived a forced kill for the whole grace period
    #[error("Process {pid:?} still alive {grace:?} after a forced kill")]
    Unresponsive { pid: Option<u32>, grace: Duration },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Lifecycle of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// A termination signal has been sent
    Stopping,
    Exited(ExitInfo),
}

/// Result of [`ProcessSupervisor::terminate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// Nothing was running
    NotRunning,
    /// The process had already exited on its own
    AlreadyExited(ExitInfo),
    /// Exited after the graceful-stop signal
    Graceful(ExitInfo),
    /// Exited after a forced kill; `escalated` is true when a graceful stop timed out first
    Forced { exit: ExitInfo, escalated: bool },
}

impl TerminationOutcome {
    /// A graceful stop timed out and was escalated to a forced kill
    pub fn escalated(&self) -> bool {
        matches!(self, TerminationOutcome::Forced { escalated: true, .. })
    }
}

/// One running encoder process. Owned exclusively by the supervisor that spawned it.
pub struct ProcessHandle {
    /// Stable identifier for logs and events
    pub id: Uuid,
    pub pid: Option<u32>,
    pub argv: Vec<String>,
    pub started_at: Instant,
    pub started_at_unix_ms: i64,
    pub state: ProcessState,
    /// Restarts of the logical pipeline when this process was spawned
    pub restart_count: u32,
    process: Box<dyn PlatformProcess>,
    diagnostics: Option<mpsc::Receiver<String>>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("restart_count", &self.restart_count)
            .field("argv", &self.argv)
            .finish()
    }
}

impl ProcessHandle {
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Spawns and terminates a single encoder process
pub struct ProcessSupervisor {
    launcher: Arc<dyn ProcessLauncher>,
    termination_timeout: Duration,
    kill_grace: Duration,
    handle: Option<ProcessHandle>,
}

impl ProcessSupervisor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, termination_timeout: Duration) -> Self {
        Self {
            launcher,
            termination_timeout,
            kill_grace: FORCE_KILL_GRACE,
            handle: None,
        }
    }

    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(|h| h.pid)
    }

    /// Launch a process. stdin is discarded, stderr is turned into a line channel.
    pub fn spawn(
        &mut self,
        argv: Vec<String>,
        restart_count: u32,
    ) -> Result<&ProcessHandle, ProcessError> {
        if self.is_running() {
            return Err(ProcessError::AlreadyRunning(self.pid()));
        }

        let mut process = self.launcher.start(&argv).map_err(ProcessError::Launch)?;
        let pid = process.id();
        let diagnostics = process
            .take_diagnostics()
            .map(|stream| spawn_line_reader(stream, DIAGNOSTIC_CHANNEL_CAPACITY));

        let handle = ProcessHandle {
            id: Uuid::new_v4(),
            pid,
            argv,
            started_at: Instant::now(),
            started_at_unix_ms: unix_timestamp_ms(),
            state: ProcessState::Running,
            restart_count,
            process,
            diagnostics,
        };
        info!(pid = ?handle.pid, id = %handle.id, "encoder process spawned");
        debug!(argv = ?handle.argv, "encoder argv");

        Ok(self.handle.insert(handle))
    }

    /// Hand the diagnostic line channel to a log monitor. `None` after the first call.
    pub fn take_diagnostics(&mut self) -> Option<mpsc::Receiver<String>> {
        self.handle.as_mut().and_then(|h| h.diagnostics.take())
    }

    /// Non-blocking exit check; records the exit in the handle
    pub fn poll_exit(&mut self) -> Option<ExitInfo> {
        let handle = self.handle.as_mut()?;
        if let ProcessState::Exited(exit) = handle.state {
            return Some(exit);
        }
        match handle.process.try_wait() {
            Ok(Some(exit)) => {
                handle.state = ProcessState::Exited(exit);
                Some(exit)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(pid = ?handle.pid, error = %e, "failed to poll encoder exit status");
                None
            }
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.handle.is_some() && self.poll_exit().is_none()
    }

    /// Sleep `delay`, then report whether the process already died
    pub async fn probe(&mut self, delay: Duration) -> Option<ExitInfo> {
        tokio::time::sleep(delay).await;
        self.poll_exit()
    }

    pub fn signal(&mut self, graceful: bool) -> Result<(), ProcessError> {
        let handle = self.handle.as_mut().ok_or(ProcessError::NotRunning)?;
        let signal = if graceful {
            Signal::Graceful
        } else {
            Signal::Force
        };
        handle
            .process
            .signal(signal)
            .map_err(|source| ProcessError::Signal {
                pid: handle.pid,
                source,
            })?;
        if handle.state == ProcessState::Running {
            handle.state = ProcessState::Stopping;
        }
        Ok(())
    }

    pub fn kill(&mut self) -> Result<(), ProcessError> {
        self.signal(false)
    }

    /// Wait up to `timeout` for exit. `Ok(None)` means still running.
    pub async fn wait(&mut self, timeout: Duration) -> Result<Option<ExitInfo>, ProcessError> {
        let handle = self.handle.as_mut().ok_or(ProcessError::NotRunning)?;
        if let ProcessState::Exited(exit) = handle.state {
            return Ok(Some(exit));
        }
        match tokio::time::timeout(timeout, handle.process.wait()).await {
            Ok(Ok(exit)) => {
                handle.state = ProcessState::Exited(exit);
                Ok(Some(exit))
            }
            Ok(Err(e)) => Err(ProcessError::Io(e)),
            Err(_) => Ok(None),
        }
    }

    /// Stop the process and release the handle.
    ///
    /// Graceful: signal, wait `termination_timeout`, then force-kill and wait
    /// the kill grace. Forced: kill and wait the kill grace.
    pub async fn terminate(&mut self, force: bool) -> Result<TerminationOutcome, ProcessError> {
        if self.handle.is_none() {
            return Ok(TerminationOutcome::NotRunning);
        }
        if let Some(exit) = self.poll_exit() {
            self.handle = None;
            return Ok(TerminationOutcome::AlreadyExited(exit));
        }

        let pid = self.pid();
        if !force {
            match self.signal(true) {
                Ok(()) => {
                    if let Some(exit) = self.wait(self.termination_timeout).await? {
                        info!(pid = ?pid, %exit, "encoder stopped gracefully");
                        self.handle = None;
                        return Ok(TerminationOutcome::Graceful(exit));
                    }
                    warn!(
                        pid = ?pid,
                        timeout = ?self.termination_timeout,
                        "encoder ignored graceful stop, escalating to kill"
                    );
                }
                Err(e) => warn!(pid = ?pid, error = %e, "graceful stop failed, escalating to kill"),
            }
        }

        self.kill()?;
        let result = self.wait(self.kill_grace).await;
        self.handle = None;
        match result? {
            Some(exit) => {
                info!(pid = ?pid, %exit, "encoder killed");
                Ok(TerminationOutcome::Forced {
                    exit,
                    escalated: !force,
                })
            }
            None => Err(ProcessError::Unresponsive {
                pid,
                grace: self.kill_grace,
            }),
        }
    }
}

/// Forward a diagnostic stream line by line into a bounded channel.
///
/// Lines end at `\n` or `\r` (progress lines are rewritten in place with
/// carriage returns). When the channel is full the line is dropped; the pipe
/// is always drained so the encoder never stalls on stderr.
pub fn spawn_line_reader(mut stream: DiagnosticStream, capacity: usize) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        let mut pending: Vec<u8> = Vec::with_capacity(256);
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for &byte in &buf[..n] {
                if byte == b'\n' || byte == b'\r' {
                    flush_line(&mut pending, &tx);
                } else {
                    pending.push(byte);
                    if pending.len() >= MAX_LINE_BYTES {
                        flush_line(&mut pending, &tx);
                    }
                }
            }
        }
        flush_line(&mut pending, &tx);
    });
    rx
}

fn flush_line(pending: &mut Vec<u8>, tx: &mpsc::Sender<String>) {
    if pending.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(pending).trim().to_string();
    pending.clear();
    if line.is_empty() {
        return;
    }
    if let Err(TrySendError::Full(_)) = tx.try_send(line) {
        debug!("diagnostic channel full, dropping line");
    }
}

/// Drain whatever lines are buffered right now, without waiting
pub fn drain_available(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}

/// Current timestamp in milliseconds
pub fn unix_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
