//! Metrics collector — host load plus worker-reported throughput.
//!
//! Host CPU and memory come from a long-lived `sysinfo::System` (CPU usage
//! is a delta between two refreshes, so the handle must persist across
//! ticks). Throughput and connection counts are summed over every worker
//! that serves HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sysinfo::System;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use warden_core::config::FleetConfig;
use warden_core::{InstanceHandle, MetricsSnapshot, epoch_secs};

/// Anything that can produce a snapshot for the current fleet.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Collect a snapshot. `workers` is the live fleet at the start of the tick.
    async fn collect(&self, workers: &[InstanceHandle]) -> MetricsSnapshot;
}

/// Body of a worker's stats endpoint. Missing fields read as zero.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerStats {
    pub events_per_minute: f64,
    pub active_connections: u64,
}

/// Production collector backed by `sysinfo` and worker stats endpoints.
pub struct SystemMetricsCollector {
    system: Arc<Mutex<System>>,
    stats_path: String,
    stats_timeout: Duration,
    /// Worker stats reads that failed since start.
    stats_failures: AtomicU64,
}

impl SystemMetricsCollector {
    pub fn new(stats_path: impl Into<String>, stats_timeout: Duration) -> Self {
        let mut system = System::new();
        // Prime the CPU counters so the first real sample has a baseline.
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Arc::new(Mutex::new(system)),
            stats_path: stats_path.into(),
            stats_timeout,
            stats_failures: AtomicU64::new(0),
        }
    }

    pub fn from_config(fleet: &FleetConfig, stats_timeout: Duration) -> Self {
        Self::new(fleet.stats_path.clone(), stats_timeout)
    }

    pub fn stats_failures(&self) -> u64 {
        self.stats_failures.load(Ordering::Relaxed)
    }

    /// Sample host CPU and memory percentages.
    async fn host_load(&self) -> (f64, f64) {
        let system = Arc::clone(&self.system);
        let sampled = tokio::task::spawn_blocking(move || {
            let mut sys = match system.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            sys.refresh_cpu();
            sys.refresh_memory();
            let cpu = sys.global_cpu_info().cpu_usage() as f64;
            let total = sys.total_memory();
            let mem = if total == 0 {
                0.0
            } else {
                sys.used_memory() as f64 / total as f64 * 100.0
            };
            (cpu, mem)
        })
        .await;

        match sampled {
            Ok((cpu, mem)) => (sanitize_percent(cpu), sanitize_percent(mem)),
            Err(e) => {
                warn!(error = %e, "host load sampling failed");
                (0.0, 0.0)
            }
        }
    }

    /// Sum stats over every worker with a listen address.
    async fn worker_stats(&self, workers: &[InstanceHandle]) -> WorkerStats {
        let mut set = JoinSet::new();
        for address in workers.iter().filter_map(|w| w.address.clone()) {
            let path = self.stats_path.clone();
            let timeout = self.stats_timeout;
            set.spawn(async move { fetch_stats(&address, &path, timeout).await });
        }

        let mut total = WorkerStats::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(stats)) => {
                    total.events_per_minute += stats.events_per_minute.max(0.0);
                    total.active_connections += stats.active_connections;
                }
                Ok(None) | Err(_) => {
                    self.stats_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        total
    }
}

#[async_trait]
impl MetricsSource for SystemMetricsCollector {
    async fn collect(&self, workers: &[InstanceHandle]) -> MetricsSnapshot {
        let ((cpu, mem), stats) = tokio::join!(self.host_load(), self.worker_stats(workers));

        let snapshot = MetricsSnapshot {
            timestamp: epoch_secs(),
            cpu_percent: cpu,
            memory_percent: mem,
            throughput_events_per_minute: stats.events_per_minute,
            active_connections: stats.active_connections,
            current_instance_count: workers.len() as u32,
        };
        debug!(
            cpu = snapshot.cpu_percent,
            mem = snapshot.memory_percent,
            throughput = snapshot.throughput_events_per_minute,
            instances = snapshot.current_instance_count,
            "metrics collected"
        );
        snapshot
    }
}

/// Read one worker's stats; `None` on any failure.
async fn fetch_stats(address: &str, path: &str, timeout: Duration) -> Option<WorkerStats> {
    match warden_health::http_get(address, path, timeout).await {
        Ok((status, body)) if status.is_success() => match serde_json::from_slice(&body) {
            Ok(stats) => Some(stats),
            Err(e) => {
                debug!(%address, error = %e, "worker stats not valid JSON");
                None
            }
        },
        Ok((status, _)) => {
            debug!(%address, %status, "worker stats non-2xx");
            None
        }
        Err(e) => {
            debug!(error = %e, "worker stats unreachable");
            None
        }
    }
}

fn sanitize_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// A source that reports fixed load figures, adjustable between ticks.
#[derive(Debug, Default)]
pub struct FixedMetricsSource {
    load: Mutex<(f64, f64, f64)>,
}

impl FixedMetricsSource {
    pub fn new(cpu_percent: f64, memory_percent: f64, throughput: f64) -> Self {
        Self {
            load: Mutex::new((cpu_percent, memory_percent, throughput)),
        }
    }

    pub fn set(&self, cpu_percent: f64, memory_percent: f64, throughput: f64) {
        let mut load = match self.load.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *load = (cpu_percent, memory_percent, throughput);
    }
}

#[async_trait]
impl MetricsSource for FixedMetricsSource {
    async fn collect(&self, workers: &[InstanceHandle]) -> MetricsSnapshot {
        let (cpu, mem, tp) = match self.load.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        MetricsSnapshot {
            timestamp: epoch_secs(),
            cpu_percent: cpu,
            memory_percent: mem,
            throughput_events_per_minute: tp,
            active_connections: 0,
            current_instance_count: workers.len() as u32,
        }
    }
}
