//! Intensity presets and their resolution against config overrides.

use std::time::Duration;

use warden_core::config::{ChaosConfig, Intensity};

/// Effective chaos parameters for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosSettings {
    pub probability: f64,
    pub process_interval: Duration,
    pub container_interval: Duration,
    /// Quiet period for a target kind after one of its kills.
    pub recovery_time: Duration,
    pub max_concurrent_kills: u32,
    pub containers: Vec<String>,
    pub seed: Option<u64>,
}

impl ChaosSettings {
    pub fn preset(intensity: Intensity) -> Self {
        let (probability, process, container, recovery, max_concurrent) = match intensity {
            Intensity::Low => (0.10, 300, 600, 60, 1),
            Intensity::Medium => (0.25, 120, 300, 45, 1),
            Intensity::High => (0.50, 60, 180, 30, 2),
            Intensity::Extreme => (0.75, 30, 90, 15, 3),
        };
        Self {
            probability,
            process_interval: Duration::from_secs(process),
            container_interval: Duration::from_secs(container),
            recovery_time: Duration::from_secs(recovery),
            max_concurrent_kills: max_concurrent,
            containers: Vec::new(),
            seed: None,
        }
    }

    /// The preset for `config.intensity` with any explicit overrides applied.
    pub fn resolve(config: &ChaosConfig) -> Self {
        let preset = Self::preset(config.intensity);
        Self {
            probability: config.probability.unwrap_or(preset.probability).clamp(0.0, 1.0),
            process_interval: config.process_interval.unwrap_or(preset.process_interval),
            container_interval: config.container_interval.unwrap_or(preset.container_interval),
            recovery_time: config.recovery_time.unwrap_or(preset.recovery_time),
            max_concurrent_kills: config
                .max_concurrent_kills
                .unwrap_or(preset.max_concurrent_kills),
            containers: config.containers.clone(),
            seed: config.seed,
        }
    }
}
