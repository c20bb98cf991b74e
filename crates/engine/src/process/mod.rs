//! Encoder process management

pub mod platform;
pub mod supervisor;

pub use platform::{
    DiagnosticStream, ExitInfo, PlatformProcess, ProcessLauncher, Signal, TokioLauncher,
    TokioProcess,
};
pub use supervisor::{
    drain_available, spawn_line_reader, unix_timestamp_ms, ProcessError, ProcessHandle,
    ProcessState, ProcessSupervisor, TerminationOutcome, DIAGNOSTIC_CHANNEL_CAPACITY,
    FORCE_KILL_GRACE,
};
