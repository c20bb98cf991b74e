//! Continuity orchestration for a 24/7 looping-video broadcast encoder
//!
//! Keeps one encoder pipeline on air while the looping source changes,
//! either by crossfading between two input slots of one long-lived encoder
//! or by handing over to a freshly spawned encoder.

pub use loopcast_config as config;

pub mod controller;
pub mod encode;
pub mod events;
pub mod filter_graph;
pub mod log_monitor;
pub mod process;
pub mod recovery;
pub mod startup;
pub mod status;
pub mod status_server;
pub mod strategy;
pub mod switcher;
pub mod telemetry;

pub use controller::{ContinuityController, ControllerError};
pub use events::{EventSink, StreamEvent, StreamEventKind, TracingSink};
pub use status::{StatusSnapshot, StreamState};
