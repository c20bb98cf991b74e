//! Status surface
//!
//! The controller publishes a [`StatusSnapshot`] into [`SharedStatus`] after
//! every operation and monitoring tick, so readers never wait on the
//! controller itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StrategyKind;
use crate::log_monitor::{ClassifiedError, LogMetrics};
use crate::process::unix_timestamp_ms;
use crate::switcher::InputSlot;

/// How often host metrics are refreshed
pub const SYSTEM_METRICS_INTERVAL: Duration = Duration::from_secs(2);

/// Pipeline state. Exactly one at a time, owned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    #[default]
    Stopped,
    Starting,
    Running,
    Switching,
    Stopping,
    Error,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Stopped => "stopped",
            StreamState::Starting => "starting",
            StreamState::Running => "running",
            StreamState::Switching => "switching",
            StreamState::Stopping => "stopping",
            StreamState::Error => "error",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host resource usage
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub state: StreamState,
    pub strategy: StrategyKind,
    pub active_pid: Option<u32>,
    pub current_source: Option<PathBuf>,
    /// Target of an in-flight switch
    pub pending_source: Option<PathBuf>,
    pub started_at_unix_ms: Option<i64>,
    pub uptime_secs: f64,
    pub switch_count: u64,
    pub restart_count: u32,
    pub max_restart_attempts: u32,
    pub healthy: bool,
    pub health_issue: Option<String>,
    pub metrics: Option<LogMetrics>,
    /// Newest last
    pub recent_errors: Vec<ClassifiedError>,
    /// Human-readable reason for the last failure
    pub last_error: Option<String>,
    pub stderr_tail: Vec<String>,
    /// Input slots of the persistent strategy; empty under handover
    #[serde(default)]
    pub slots: Vec<InputSlot>,
    pub system: SystemMetrics,
    pub timestamp_unix_ms: i64,
}

impl StatusSnapshot {
    /// Running with a healthy encoder
    pub fn is_live(&self) -> bool {
        self.state == StreamState::Running && self.healthy
    }
}

pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(RwLock::new(StatusSnapshot::default()))
}

/// Replace the controller-owned part of the snapshot, keeping host metrics
pub async fn publish_status(shared: &SharedStatus, mut snapshot: StatusSnapshot) {
    let mut guard = shared.write().await;
    snapshot.system = std::mem::take(&mut guard.system);
    snapshot.timestamp_unix_ms = unix_timestamp_ms();
    *guard = snapshot;
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let total_memory = sys.total_memory();
    let mem_usage = if total_memory > 0 {
        (sys.used_memory() as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };
    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: sys.global_cpu_usage(),
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}

/// Refresh host metrics every `interval` until `cancel` fires
pub fn spawn_system_metrics_refresher(
    shared: SharedStatus,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let system = tokio::task::spawn_blocking(collect_system_metrics)
                .await
                .unwrap_or_default();
            {
                let mut snapshot = shared.write().await;
                snapshot.system = system;
                snapshot.timestamp_unix_ms = unix_timestamp_ms();
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_monitor::{ErrorCategory, Severity};
    use proptest::prelude::*;

    #[test]
    fn test_collect_system_metrics_in_range() {
        let m = collect_system_metrics();
        assert!(m.mem_usage_percent >= 0.0 && m.mem_usage_percent <= 100.0);
        assert!(m.load_avg_1 >= 0.0);
    }

    #[test]
    fn test_is_live() {
        let mut snap = StatusSnapshot {
            state: StreamState::Running,
            healthy: true,
            ..Default::default()
        };
        assert!(snap.is_live());
        snap.healthy = false;
        assert!(!snap.is_live());
        snap.healthy = true;
        snap.state = StreamState::Switching;
        assert!(!snap.is_live());
    }

    #[tokio::test]
    async fn test_publish_keeps_system_metrics() {
        let shared = new_shared_status();
        shared.write().await.system.cpu_usage_percent = 42.0;

        let snap = StatusSnapshot {
            state: StreamState::Running,
            switch_count: 3,
            ..Default::default()
        };
        publish_status(&shared, snap).await;

        let current = shared.read().await;
        assert_eq!(current.state, StreamState::Running);
        assert_eq!(current.switch_count, 3);
        assert_eq!(current.system.cpu_usage_percent, 42.0);
        assert!(current.timestamp_unix_ms > 0);
    }

    #[tokio::test]
    async fn test_refresher_stops_on_cancel() {
        let shared = new_shared_status();
        let cancel = CancellationToken::new();
        let task = spawn_system_metrics_refresher(
            shared.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("refresher should exit")
            .unwrap();
        assert!(shared.read().await.timestamp_unix_ms > 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_status_snapshot_json_round_trip(
            switch_count in any::<u64>(),
            restart_count in 0u32..100,
            pid in proptest::option::of(1u32..100_000),
            error_count in 0usize..5,
        ) {
            let snap = StatusSnapshot {
                state: StreamState::Error,
                strategy: StrategyKind::Persistent,
                active_pid: pid,
                current_source: Some(PathBuf::from("/loops/a.mp4")),
                switch_count,
                restart_count,
                recent_errors: (0..error_count)
                    .map(|i| ClassifiedError {
                        timestamp_unix_ms: i as i64,
                        severity: Severity::Error,
                        category: ErrorCategory::RtmpError,
                        message: format!("failure {}", i),
                        raw: format!("[error] failure {}", i),
                    })
                    .collect(),
                last_error: Some("encoder exited with code 1".to_string()),
                ..Default::default()
            };
            let json = serde_json::to_string(&snap).unwrap();
            let parsed: StatusSnapshot = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(snap, parsed);
        }
    }
}
