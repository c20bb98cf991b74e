//! Bounded automatic restart after an encoder crash

use std::time::Duration;

use crate::config::ProcessConfig;

/// What to do about a crash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Restart; `attempt` is 1-based
    Restart { attempt: u32 },
    /// Budget used up; the pipeline stays in Error
    Exhausted { attempts: u32 },
    /// Automatic restart is turned off
    Disabled,
}

/// Restart budget for one logical pipeline run
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    enabled: bool,
    max_attempts: u32,
    delay: Duration,
    attempts: u32,
}

impl RecoveryPolicy {
    pub fn new(enabled: bool, max_attempts: u32, delay: Duration) -> Self {
        Self {
            enabled,
            max_attempts,
            delay,
            attempts: 0,
        }
    }

    pub fn from_config(cfg: &ProcessConfig) -> Self {
        Self::new(
            cfg.restart_on_error,
            cfg.max_restart_attempts,
            cfg.restart_delay(),
        )
    }

    /// Record a crash and decide. Counts the attempt before the restart runs,
    /// so a failed restart still uses up budget.
    pub fn on_crash(&mut self) -> RecoveryDecision {
        if !self.enabled {
            return RecoveryDecision::Disabled;
        }
        self.try_consume()
    }

    /// Take one attempt for an explicit restart. Ignores `enabled`.
    pub fn try_consume(&mut self) -> RecoveryDecision {
        if self.is_exhausted() {
            return RecoveryDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        RecoveryDecision::Restart {
            attempt: self.attempts,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Start a fresh budget; only on an explicit successful start
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
