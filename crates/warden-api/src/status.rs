//! Status report and operator commands shared by the driver and the API.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use warden_core::{HealthStatus, InstanceHandle, MetricsSnapshot, ScalingDecision};
use warden_fleet::FleetStats;
use warden_recovery::RecoveryStats;

/// Control loop state machine: `Running ⇄ Paused`, terminal `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Running,
    Paused,
    Stopped,
}

/// An operator request. Arrives from stdin or the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Pause,
    Resume,
    Backup,
    Restore { backup_id: Option<String> },
    Status,
    Quit,
}

/// Everything the driver publishes after each tick.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct StatusReport {
    pub state: RunState,
    pub dry_run: bool,
    pub chaos_enabled: bool,
    pub ticks: u64,
    pub uptime_secs: u64,
    pub min_instances: u32,
    pub max_instances: u32,
    pub instances: Vec<InstanceHandle>,
    pub last_metrics: Option<MetricsSnapshot>,
    pub last_decision: Option<ScalingDecision>,
    pub health: Option<HealthStatus>,
    pub fleet: FleetStats,
    pub chaos_attempts: u64,
    pub chaos_kills: u64,
    pub recovery: RecoveryStats,
    pub last_backup: Option<String>,
    /// Most recent backup failure, cleared by the next successful backup.
    pub backup_error: Option<String>,
    /// Set when the operator must act (e.g. Critical with no backup).
    pub alert: Option<String>,
}

impl StatusReport {
    pub fn instance_count(&self) -> u32 {
        self.instances.len() as u32
    }
}

pub type SharedStatus = Arc<RwLock<StatusReport>>;
