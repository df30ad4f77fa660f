//! Control plane configuration file.
//!
//! One file describes the whole control plane. The format is picked from
//! the extension: `.json`, `.yaml`/`.yml`, or `.toml`. Only the `scaling`
//! section is required; every other section falls back to defaults.
//!
//! ```yaml
//! scaling:
//!   min_instances: 2
//!   max_instances: 10
//!   scale_up_threshold: 80
//!   scale_down_threshold: 20
//!   scale_up_cooldown: 60s
//!   scale_down_cooldown: 5m
//!   cpu_threshold: 90
//!   memory_threshold: 90
//!   throughput_threshold: 6000
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration;
use crate::types::BackendKind;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unsupported config format: {0} (expected .json, .yaml, .yml or .toml)")]
    UnsupportedFormat(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WardenConfig {
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub chaos: ChaosConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

// ── Scaling ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingConfig {
    pub min_instances: u32,
    pub max_instances: u32,
    /// Load score (0–100) above which the fleet grows.
    pub scale_up_threshold: f64,
    /// Load score (0–100) below which the fleet shrinks.
    pub scale_down_threshold: f64,
    #[serde(with = "duration::serde_str")]
    pub scale_up_cooldown: Duration,
    #[serde(with = "duration::serde_str")]
    pub scale_down_cooldown: Duration,
    /// CPU percent that forces scale-up pressure regardless of the score.
    pub cpu_threshold: f64,
    /// Memory percent that forces scale-up pressure regardless of the score.
    pub memory_threshold: f64,
    /// Events per minute that count as 100% throughput load.
    pub throughput_threshold: f64,
    #[serde(default = "default_weight_cpu")]
    pub weight_cpu: f64,
    #[serde(default = "default_weight_other")]
    pub weight_memory: f64,
    #[serde(default = "default_weight_other")]
    pub weight_throughput: f64,
    #[serde(default = "default_scale_up_step")]
    pub scale_up_step: u32,
    #[serde(default = "default_scale_down_step")]
    pub scale_down_step: u32,
}

fn default_weight_cpu() -> f64 {
    0.4
}

fn default_weight_other() -> f64 {
    0.3
}

fn default_scale_up_step() -> u32 {
    2
}

fn default_scale_down_step() -> u32 {
    1
}

impl ScalingConfig {
    /// Clamp an instance count into `[min_instances, max_instances]`.
    pub fn clamp(&self, n: u32) -> u32 {
        n.clamp(self.min_instances, self.max_instances)
    }
}

// ── Fleet ─────────────────────────────────────────────────────────

/// How to launch one kind of worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSpec {
    #[serde(default)]
    pub backend: BackendKind,
    /// Executable path (process backend) or image reference (container backend).
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl WorkerSpec {
    fn simulated(name: &str) -> Self {
        Self {
            backend: BackendKind::Simulated,
            command: name.to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    pub primary: WorkerSpec,
    pub secondary: WorkerSpec,
    /// Live primaries allowed before new units fall back to secondary.
    pub max_primary: u32,
    /// Extra attempts for a unit that fails to start within one batch.
    pub start_retries: u32,
    /// First port handed to HTTP-serving workers; each unit takes the next free one.
    pub base_port: u16,
    pub health_path: String,
    pub stats_path: String,
    /// Container CLI used by the container backend ("docker" or "podman").
    pub container_runtime: String,
    #[serde(with = "duration::serde_str")]
    pub restart_delay: Duration,
    #[serde(with = "duration::serde_str")]
    pub max_restart_delay: Duration,
    #[serde(with = "duration::serde_str")]
    pub op_timeout: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            primary: WorkerSpec::simulated("primary-worker"),
            secondary: WorkerSpec::simulated("secondary-worker"),
            max_primary: 10,
            start_retries: 0,
            base_port: 18080,
            health_path: "/health".to_string(),
            stats_path: "/stats".to_string(),
            container_runtime: "docker".to_string(),
            restart_delay: Duration::from_millis(100),
            max_restart_delay: Duration::from_secs(5),
            op_timeout: Duration::from_secs(10),
        }
    }
}

// ── Health ────────────────────────────────────────────────────────

/// An external dependency probed every tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceEndpoint {
    pub name: String,
    /// `host:port` to connect to.
    pub address: String,
    #[serde(default = "default_health_path")]
    pub path: String,
    /// Core services turn the fleet Critical when unhealthy.
    #[serde(default)]
    pub core: bool,
    #[serde(default, with = "duration::serde_opt")]
    pub timeout: Option<Duration>,
}

fn default_health_path() -> String {
    "/health".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub services: Vec<ServiceEndpoint>,
    #[serde(with = "duration::serde_str")]
    pub probe_timeout: Duration,
    /// Healthy ratio below which the fleet is Critical.
    pub critical_floor: f64,
    /// Also probe every worker that has a listen address.
    pub probe_workers: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            probe_timeout: Duration::from_secs(2),
            critical_floor: 0.5,
            probe_workers: true,
        }
    }
}

// ── Chaos ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Low,
    #[default]
    Medium,
    High,
    Extreme,
}

impl std::str::FromStr for Intensity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "extreme" => Ok(Self::Extreme),
            other => Err(ConfigError::Invalid(format!("unknown chaos intensity: {other}"))),
        }
    }
}

/// Chaos settings. Unset overrides fall back to the intensity preset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ChaosConfig {
    pub enabled: bool,
    pub intensity: Intensity,
    pub probability: Option<f64>,
    #[serde(with = "duration::serde_opt")]
    pub process_interval: Option<Duration>,
    #[serde(with = "duration::serde_opt")]
    pub container_interval: Option<Duration>,
    #[serde(with = "duration::serde_opt")]
    pub recovery_time: Option<Duration>,
    pub max_concurrent_kills: Option<u32>,
    /// Dependency containers eligible for container-kind kills.
    pub containers: Vec<String>,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

// ── Recovery ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    pub backup_dir: PathBuf,
    /// Where the restore journal lives (survives crashes mid-restore).
    pub journal_dir: PathBuf,
    /// Files or directories making up the configuration set.
    pub config_paths: Vec<PathBuf>,
    /// Directories of built artifacts.
    pub artifact_dirs: Vec<PathBuf>,
    /// Containers stopped before and restarted after a restore.
    pub dependent_services: Vec<String>,
    pub auto_restore: bool,
    #[serde(with = "duration::serde_str")]
    pub auto_restore_cooldown: Duration,
    #[serde(with = "duration::serde_opt")]
    pub backup_interval: Option<Duration>,
    /// Complete backups kept after pruning.
    pub retain: usize,
    #[serde(with = "duration::serde_str")]
    pub step_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("./backups"),
            journal_dir: PathBuf::from("./data"),
            config_paths: Vec::new(),
            artifact_dirs: Vec::new(),
            dependent_services: Vec::new(),
            auto_restore: true,
            auto_restore_cooldown: Duration::from_secs(300),
            backup_interval: None,
            retain: 5,
            step_timeout: Duration::from_secs(120),
        }
    }
}

// ── Control loop ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    #[serde(with = "duration::serde_str")]
    pub check_interval: Duration,
    /// Upper bound for any single sub-call within a tick.
    #[serde(with = "duration::serde_str")]
    pub tick_timeout: Duration,
    #[serde(with = "duration::serde_str")]
    pub status_interval: Duration,
    pub state_path: PathBuf,
    pub api_port: Option<u16>,
    pub dry_run: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(15),
            tick_timeout: Duration::from_secs(10),
            status_interval: Duration::from_secs(60),
            state_path: PathBuf::from("./data/warden.redb"),
            api_port: None,
            dry_run: false,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────

impl WardenConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config = Self::parse(&content, &ext)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating. `format` is a file extension.
    pub fn parse(content: &str, format: &str) -> ConfigResult<Self> {
        match format {
            "json" => serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            "toml" => toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string())),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Reject configurations the control loop cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let s = &self.scaling;

        if s.min_instances > s.max_instances {
            return Err(ConfigError::Invalid(format!(
                "min_instances ({}) is greater than max_instances ({})",
                s.min_instances, s.max_instances
            )));
        }
        if s.max_instances == 0 {
            return Err(ConfigError::Invalid("max_instances must be at least 1".into()));
        }
        if s.scale_down_threshold >= s.scale_up_threshold {
            return Err(ConfigError::Invalid(format!(
                "scale_down_threshold ({}) must be below scale_up_threshold ({})",
                s.scale_down_threshold, s.scale_up_threshold
            )));
        }
        for (name, value) in [
            ("scale_up_threshold", s.scale_up_threshold),
            ("scale_down_threshold", s.scale_down_threshold),
            ("cpu_threshold", s.cpu_threshold),
            ("memory_threshold", s.memory_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within 0..=100, got {value}"
                )));
            }
        }
        if !s.throughput_threshold.is_finite() || s.throughput_threshold <= 0.0 {
            return Err(ConfigError::Invalid(
                "throughput_threshold must be a positive number".into(),
            ));
        }
        for (name, w) in [
            ("weight_cpu", s.weight_cpu),
            ("weight_memory", s.weight_memory),
            ("weight_throughput", s.weight_throughput),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number, got {w}"
                )));
            }
        }
        let weights = s.weight_cpu + s.weight_memory + s.weight_throughput;
        if (weights - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Invalid(format!(
                "load weights must sum to 1.0, got {weights}"
            )));
        }
        if s.scale_up_step == 0 || s.scale_down_step == 0 {
            return Err(ConfigError::Invalid("scale steps must be at least 1".into()));
        }

        if !(0.0..=1.0).contains(&self.health.critical_floor) {
            return Err(ConfigError::Invalid(
                "health.critical_floor must be within 0.0..=1.0".into(),
            ));
        }
        if let Some(p) = self.chaos.probability
            && !(0.0..=1.0).contains(&p)
        {
            return Err(ConfigError::Invalid(
                "chaos.probability must be within 0.0..=1.0".into(),
            ));
        }
        for (name, value) in [
            ("control.check_interval", self.control.check_interval),
            ("control.tick_timeout", self.control.tick_timeout),
            ("fleet.op_timeout", self.fleet.op_timeout),
            ("recovery.step_timeout", self.recovery.step_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}
