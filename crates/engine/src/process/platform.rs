//! OS process abstraction
//!
//! The supervisor only talks to [`ProcessLauncher`] / [`PlatformProcess`], so
//! the graceful-stop vs forced-kill distinction is implemented once per OS
//! here and nowhere else.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

/// Termination signal flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to finish its output and exit (SIGTERM on unix)
    Graceful,
    /// Kill immediately (SIGKILL on unix)
    Force,
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(sig)) => write!(f, "killed by signal {}", sig),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Diagnostic (stderr) byte stream of a running process
pub type DiagnosticStream = Pin<Box<dyn AsyncRead + Send>>;

/// A started OS process
#[async_trait]
pub trait PlatformProcess: Send {
    /// OS process id, if still known
    fn id(&self) -> Option<u32>;

    fn signal(&mut self, signal: Signal) -> io::Result<()>;

    /// Non-blocking exit check
    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>>;

    /// Wait for exit. Cancel-safe: dropping the future leaves the process untouched.
    async fn wait(&mut self) -> io::Result<ExitInfo>;

    /// Take the diagnostic stream; `None` after the first call
    fn take_diagnostics(&mut self) -> Option<DiagnosticStream>;
}

/// Starts processes from an argv
pub trait ProcessLauncher: Send + Sync {
    fn start(&self, argv: &[String]) -> io::Result<Box<dyn PlatformProcess>>;
}

/// Launches a fixed binary with tokio, discarding stdin and capturing stdout/stderr
#[derive(Debug, Clone)]
pub struct TokioLauncher {
    program: String,
}

impl TokioLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl ProcessLauncher for TokioLauncher {
    fn start(&self, argv: &[String]) -> io::Result<Box<dyn PlatformProcess>> {
        let child = Command::new(&self.program)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Box::new(TokioProcess::new(child)))
    }
}

/// [`PlatformProcess`] backed by a tokio child
pub struct TokioProcess {
    child: Child,
}

impl TokioProcess {
    pub fn new(mut child: Child) -> Self {
        // Nothing reads stdout; drain it so a chatty process never blocks on a full pipe
        if let Some(mut stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await;
            });
        }
        Self { child }
    }
}

#[async_trait]
impl PlatformProcess for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn signal(&mut self, signal: Signal) -> io::Result<()> {
        match signal {
            Signal::Force => self.child.start_kill(),
            Signal::Graceful => graceful_stop(&mut self.child),
        }
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(self.child.try_wait()?.map(ExitInfo::from))
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        Ok(self.child.wait().await?.into())
    }

    fn take_diagnostics(&mut self) -> Option<DiagnosticStream> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::pin(stderr) as DiagnosticStream)
    }
}

#[cfg(unix)]
fn graceful_stop(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(());
    };
    let pid_t: libc::pid_t = pid
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "PID out of range"))?;

    let result = unsafe { libc::kill(pid_t, libc::SIGTERM) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(()),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
fn graceful_stop(child: &mut Child) -> io::Result<()> {
    // No portable graceful signal; fall back to a forced kill
    child.start_kill()
}
