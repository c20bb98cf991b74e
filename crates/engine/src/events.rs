//! Stream lifecycle notifications
//!
//! The controller emits [`StreamEvent`]s into a bounded queue; an independent
//! worker task hands them to the injected [`EventSink`]. Emitting never waits:
//! when the queue is full the event is dropped with a warning.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};

use crate::process::unix_timestamp_ms;

/// Queue depth between the controller and the sink worker
pub const EVENT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventKind {
    SwitchCompleted {
        from: Option<PathBuf>,
        to: PathBuf,
        switch_count: u64,
    },
    SwitchFailed {
        source: PathBuf,
        reason: String,
    },
    StartFailed {
        source: PathBuf,
        reason: String,
    },
    ProcessCrashed {
        pid: Option<u32>,
        exit_code: Option<i32>,
        signal: Option<i32>,
        stderr_tail: String,
    },
    RestartAttempted {
        attempt: u32,
        max_attempts: u32,
    },
    RestartExhausted {
        attempts: u32,
    },
    TerminationEscalated {
        pid: Option<u32>,
    },
    HealthDegraded {
        reason: String,
    },
    HealthRecovered,
}

/// A timestamped event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub timestamp_unix_ms: i64,
    #[serde(flatten)]
    pub kind: StreamEventKind,
}

impl StreamEvent {
    pub fn now(kind: StreamEventKind) -> Self {
        Self {
            timestamp_unix_ms: unix_timestamp_ms(),
            kind,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            StreamEventKind::SwitchCompleted { .. } => "switch_completed",
            StreamEventKind::SwitchFailed { .. } => "switch_failed",
            StreamEventKind::StartFailed { .. } => "start_failed",
            StreamEventKind::ProcessCrashed { .. } => "process_crashed",
            StreamEventKind::RestartAttempted { .. } => "restart_attempted",
            StreamEventKind::RestartExhausted { .. } => "restart_exhausted",
            StreamEventKind::TerminationEscalated { .. } => "termination_escalated",
            StreamEventKind::HealthDegraded { .. } => "health_degraded",
            StreamEventKind::HealthRecovered => "health_recovered",
        }
    }
}

/// Receives events on the dispatcher's worker task. Delivery guarantees are the sink's concern.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &StreamEvent);
}

/// Logs every event
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn deliver(&self, event: &StreamEvent) {
        let payload = serde_json::to_string(&event.kind).unwrap_or_default();
        match event.kind {
            StreamEventKind::ProcessCrashed { .. }
            | StreamEventKind::StartFailed { .. }
            | StreamEventKind::RestartExhausted { .. } => {
                error!(event = event.name(), %payload, "stream event")
            }
            StreamEventKind::SwitchFailed { .. }
            | StreamEventKind::TerminationEscalated { .. }
            | StreamEventKind::HealthDegraded { .. } => {
                warn!(event = event.name(), %payload, "stream event")
            }
            _ => info!(event = event.name(), %payload, "stream event"),
        }
    }
}

/// Producer side of the event queue
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<StreamEvent>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("capacity", &self.tx.max_capacity())
            .finish()
    }
}

impl EventDispatcher {
    /// Spawn the worker task draining into `sink`. Must run inside a tokio runtime.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_capacity(sink, EVENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(sink: Arc<dyn EventSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(capacity);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.deliver(&event);
            }
        });
        Self { tx }
    }

    /// Queue an event without waiting
    pub fn emit(&self, kind: StreamEventKind) {
        let event = StreamEvent::now(kind);
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(event = event.name(), "event queue full, dropping event")
            }
            Err(TrySendError::Closed(event)) => {
                warn!(event = event.name(), "event worker gone, dropping event")
            }
        }
    }
}
