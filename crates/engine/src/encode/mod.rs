//! Encoder invocation

pub mod command;

pub use command::{build_stream_args, CommandError, StreamCommandParams, VideoInputs};
