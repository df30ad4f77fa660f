//! Domain types shared across the control plane.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Opaque identifier of a worker unit (process handle or container ID).
pub type UnitId = String;

// ── Metrics ───────────────────────────────────────────────────────

/// Point-in-time view of fleet load. Produced once per tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub throughput_events_per_minute: f64,
    pub active_connections: u64,
    pub current_instance_count: u32,
}

impl MetricsSnapshot {
    /// A snapshot with every sub-metric at zero.
    pub fn zeroed(current_instance_count: u32) -> Self {
        Self {
            timestamp: epoch_secs(),
            cpu_percent: 0.0,
            memory_percent: 0.0,
            throughput_events_per_minute: 0.0,
            active_connections: 0,
            current_instance_count,
        }
    }

    /// Build the key for the metrics history table.
    pub fn table_key(&self) -> String {
        format!("{:020}", self.timestamp)
    }
}

// ── Scaling ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    None,
    ScaleUp,
    ScaleDown,
}

/// Output of the decision engine for a single tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingDecision {
    pub action: ScaleAction,
    pub current_instances: u32,
    pub target_instances: u32,
    pub reason: String,
    /// Unix timestamp (seconds).
    pub computed_at: u64,
}

impl ScalingDecision {
    pub fn none(current: u32, reason: impl Into<String>) -> Self {
        Self {
            action: ScaleAction::None,
            current_instances: current,
            target_instances: current,
            reason: reason.into(),
            computed_at: epoch_secs(),
        }
    }

    /// Number of units this decision adds (positive) or removes (negative).
    pub fn delta(&self) -> i64 {
        self.target_instances as i64 - self.current_instances as i64
    }
}

/// An applied scaling action, as recorded in the state store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingEvent {
    pub timestamp: u64,
    pub action: ScaleAction,
    pub from: u32,
    pub requested: u32,
    /// Best-effort count actually reached.
    pub reached: u32,
    pub reason: String,
}

impl ScalingEvent {
    pub fn table_key(&self) -> String {
        format!("{:020}:{}", self.timestamp, self.from)
    }
}

// ── Instances ─────────────────────────────────────────────────────

/// Worker flavour. Primaries are more capable but capacity-limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    Primary,
    Secondary,
}

impl std::fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

/// Which launcher backend manages a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Process,
    Container,
    #[default]
    Simulated,
}

/// A running worker unit owned by the lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceHandle {
    pub id: UnitId,
    pub kind: InstanceKind,
    pub backend: BackendKind,
    /// Unix timestamp (seconds) when the unit was started.
    pub started_at: u64,
    /// `host:port` the worker listens on, if it serves HTTP.
    pub address: Option<String>,
}

// ── Chaos ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Process,
    Container,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process => f.write_str("process"),
            Self::Container => f.write_str("container"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaosOutcome {
    Killed,
    Failed,
    /// Target selected but left alone (dry run).
    DryRun,
}

/// Append-only record of a single kill attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChaosEvent {
    /// Unix timestamp (milliseconds).
    pub timestamp: u64,
    pub target: String,
    pub target_kind: TargetKind,
    pub outcome: ChaosOutcome,
    pub recovery_time_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChaosEvent {
    pub fn table_key(&self) -> String {
        format!("{:020}:{}", self.timestamp, self.target)
    }
}

// ── Backups ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    StateStore,
    Configuration,
    Artifacts,
}

impl ComponentKind {
    /// Restore order: state store before anything that reads it.
    pub fn restore_rank(self) -> u8 {
        match self {
            Self::StateStore => 0,
            Self::Configuration => 1,
            Self::Artifacts => 2,
        }
    }
}

/// One backed-up component inside a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentEntry {
    pub name: String,
    pub kind: ComponentKind,
    pub files: u64,
    pub bytes: u64,
    /// Hex SHA-256 over the component payload.
    pub sha256: String,
}

/// Written last; its presence marks a backup as complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupManifest {
    pub backup_id: String,
    /// Unix timestamp (milliseconds).
    pub created_at: u64,
    pub component_list: Vec<ComponentEntry>,
    pub source_version: String,
}

// ── Health ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Healthy,
    Unhealthy,
}

/// Result of probing one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceHealth {
    pub state: ProbeState,
    pub latency_ms: u64,
    /// Core services drive the Critical level on their own.
    pub core: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
}

/// Aggregate health for one tick. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub services: BTreeMap<String, ServiceHealth>,
    pub level: HealthLevel,
    /// Why the level is not Healthy, if it isn't.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

impl HealthStatus {
    pub fn healthy_count(&self) -> usize {
        self.services
            .values()
            .filter(|s| s.state == ProbeState::Healthy)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.services.len()
    }

    /// Healthy fraction in `0.0..=1.0`; an empty set counts as fully healthy.
    pub fn healthy_ratio(&self) -> f64 {
        if self.services.is_empty() {
            1.0
        } else {
            self.healthy_count() as f64 / self.total_count() as f64
        }
    }

    pub fn is_critical(&self) -> bool {
        self.level == HealthLevel::Critical
    }
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(state: ProbeState) -> ServiceHealth {
        ServiceHealth {
            state,
            latency_ms: 3,
            core: false,
        }
    }

    #[test]
    fn health_counts_and_ratio() {
        let mut services = BTreeMap::new();
        services.insert("a".to_string(), service(ProbeState::Healthy));
        services.insert("b".to_string(), service(ProbeState::Unhealthy));
        services.insert("c".to_string(), service(ProbeState::Healthy));
        services.insert("d".to_string(), service(ProbeState::Healthy));

        let status = HealthStatus {
            services,
            level: HealthLevel::Degraded,
            reasons: vec![],
        };
        assert_eq!(status.healthy_count(), 3);
        assert_eq!(status.total_count(), 4);
        assert!((status.healthy_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_health_is_fully_healthy() {
        let status = HealthStatus {
            services: BTreeMap::new(),
            level: HealthLevel::Healthy,
            reasons: vec![],
        };
        assert_eq!(status.healthy_ratio(), 1.0);
    }

    #[test]
    fn decision_delta_sign() {
        let mut d = ScalingDecision::none(4, "steady");
        assert_eq!(d.delta(), 0);
        d.target_instances = 6;
        assert_eq!(d.delta(), 2);
        d.target_instances = 3;
        assert_eq!(d.delta(), -1);
    }

    #[test]
    fn restore_rank_puts_state_store_first() {
        let mut kinds = vec![
            ComponentKind::Artifacts,
            ComponentKind::StateStore,
            ComponentKind::Configuration,
        ];
        kinds.sort_by_key(|k| k.restore_rank());
        assert_eq!(
            kinds,
            vec![
                ComponentKind::StateStore,
                ComponentKind::Configuration,
                ComponentKind::Artifacts
            ]
        );
    }

    #[test]
    fn manifest_json_shape() {
        let manifest = BackupManifest {
            backup_id: "backup-1".to_string(),
            created_at: 1000,
            component_list: vec![ComponentEntry {
                name: "state".to_string(),
                kind: ComponentKind::StateStore,
                files: 1,
                bytes: 42,
                sha256: "ab".to_string(),
            }],
            source_version: "0.1.0".to_string(),
        };
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["component_list"][0]["kind"], "state_store");
        let back: BackupManifest = serde_json::from_value(json).unwrap();
        assert_eq!(back, manifest);
    }
}
