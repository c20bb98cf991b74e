//! Configuration module for loopcast
//!
//! Handles loading the broadcast configuration from TOML files, environment
//! variable overrides and range validation.

pub mod config;

pub use config::*;
