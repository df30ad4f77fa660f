//! Lifecycle manager — the single owner of worker handles.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use warden_core::config::{FleetConfig, WorkerSpec};
use warden_core::{
    BackendKind, InstanceHandle, InstanceKind, ScaleAction, ScalingDecision, UnitId, epoch_secs,
};

use crate::container::{ContainerLauncher, ContainerRuntime};
use crate::error::{FleetError, FleetResult};
use crate::launcher::{LaunchSpec, Launcher, SimulatedLauncher};
use crate::process::ProcessLauncher;

/// The fleet as shared between the driver, chaos and recovery.
pub type SharedFleet = Arc<Mutex<LifecycleManager>>;

/// Counters since the manager was created.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct FleetStats {
    pub started: u64,
    pub stopped: u64,
    pub start_failures: u64,
    /// Handles dropped because their unit died.
    pub reaped: u64,
}

/// What an `apply` actually achieved.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApplyOutcome {
    pub action: ScaleAction,
    pub from: u32,
    pub requested: u32,
    /// Live count after the batch.
    pub reached: u32,
    pub started: Vec<UnitId>,
    pub stopped: Vec<UnitId>,
    pub failures: Vec<String>,
}

impl ApplyOutcome {
    pub fn fully_applied(&self) -> bool {
        self.reached == self.requested
    }

    /// At least one unit was started or stopped.
    pub fn changed(&self) -> bool {
        !self.started.is_empty() || !self.stopped.is_empty()
    }
}

#[derive(Debug, Default)]
struct Backoff {
    failures: u32,
    until: Option<Instant>,
}

pub struct LifecycleManager {
    config: FleetConfig,
    launchers: HashMap<BackendKind, Arc<dyn Launcher>>,
    /// Live handles, oldest first.
    handles: Vec<InstanceHandle>,
    next_seq: u64,
    backoff: HashMap<InstanceKind, Backoff>,
    stats: FleetStats,
    /// Instance count bounds enforced by `apply`.
    bounds: (u32, u32),
}

impl LifecycleManager {
    /// Create a manager with the stock launcher for every backend.
    pub fn new(config: FleetConfig) -> Self {
        let runtime = ContainerRuntime::new(config.container_runtime.clone(), config.op_timeout);
        let mut launchers: HashMap<BackendKind, Arc<dyn Launcher>> = HashMap::new();
        launchers.insert(BackendKind::Simulated, Arc::new(SimulatedLauncher::new()));
        launchers.insert(BackendKind::Process, Arc::new(ProcessLauncher::new()));
        launchers.insert(BackendKind::Container, Arc::new(ContainerLauncher::new(runtime)));
        Self {
            config,
            launchers,
            handles: Vec::new(),
            next_seq: 0,
            backoff: HashMap::new(),
            stats: FleetStats::default(),
            bounds: (0, u32::MAX),
        }
    }

    /// Keep every `apply` within `[min, max]` live instances.
    pub fn with_bounds(mut self, min: u32, max: u32) -> Self {
        self.bounds = (min, max.max(min));
        self
    }

    /// Replace the launcher for its backend.
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launchers.insert(launcher.backend(), launcher);
        self
    }

    pub fn into_shared(self) -> SharedFleet {
        Arc::new(Mutex::new(self))
    }

    pub fn handles(&self) -> Vec<InstanceHandle> {
        self.handles.clone()
    }

    pub fn live_count(&self) -> u32 {
        self.handles.len() as u32
    }

    pub fn count_kind(&self, kind: InstanceKind) -> u32 {
        self.handles.iter().filter(|h| h.kind == kind).count() as u32
    }

    pub fn stats(&self) -> FleetStats {
        self.stats.clone()
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Carry out a scaling decision, best effort. The target is clamped to
    /// the configured bounds.
    pub async fn apply(&mut self, decision: &ScalingDecision) -> ApplyOutcome {
        let from = self.live_count();
        let (min, max) = self.bounds;
        let target = decision.target_instances.clamp(min, max);
        if target != decision.target_instances {
            warn!(
                requested = decision.target_instances,
                target, min, max, "scaling target outside bounds, clamped"
            );
        }
        let mut outcome = ApplyOutcome {
            action: decision.action,
            from,
            requested: target,
            reached: from,
            started: Vec::new(),
            stopped: Vec::new(),
            failures: Vec::new(),
        };

        match decision.action {
            ScaleAction::None => {
                outcome.requested = from;
                return outcome;
            }
            ScaleAction::ScaleUp => {
                let need = target.saturating_sub(from);
                let (started, failures) = self.start_units(need).await;
                outcome.started = started;
                outcome.failures = failures;
            }
            ScaleAction::ScaleDown => {
                let excess = from.saturating_sub(target);
                let (stopped, failures) = self.stop_units(excess).await;
                outcome.stopped = stopped;
                outcome.failures = failures;
            }
        }

        outcome.reached = self.live_count();
        if outcome.fully_applied() {
            info!(
                action = ?outcome.action,
                from,
                to = outcome.reached,
                reason = %decision.reason,
                "scaling applied"
            );
        } else {
            warn!(
                action = ?outcome.action,
                from,
                requested = outcome.requested,
                reached = outcome.reached,
                failures = outcome.failures.len(),
                "scaling partially applied"
            );
        }
        outcome
    }

    /// Start units until at least `min` are live.
    pub async fn ensure_min(&mut self, min: u32) -> FleetResult<u32> {
        let need = min.saturating_sub(self.live_count());
        if need > 0 {
            let (started, failures) = self.start_units(need).await;
            debug!(started = started.len(), failures = failures.len(), min, "ensure_min batch");
        }
        let reached = self.live_count();
        if reached < min {
            return Err(FleetError::BelowMinimum {
                reached,
                required: min,
            });
        }
        Ok(reached)
    }

    /// Stop every unit. Units that fail to stop keep their handle.
    pub async fn stop_all(&mut self) -> FleetResult<u32> {
        let count = self.live_count();
        let (stopped, failures) = self.stop_units(count).await;
        if !failures.is_empty() {
            return Err(FleetError::StopFailed {
                unit: self
                    .handles
                    .iter()
                    .map(|h| h.id.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
                reason: failures.join("; "),
            });
        }
        info!(stopped = stopped.len(), "all workers stopped");
        Ok(stopped.len() as u32)
    }

    /// Stop one unit without dropping its handle; `reap` notices it later.
    pub async fn kill(&mut self, id: &str) -> FleetResult<()> {
        let handle = self
            .handles
            .iter()
            .find(|h| h.id == id)
            .cloned()
            .ok_or_else(|| FleetError::UnknownUnit(id.to_string()))?;
        let launcher = self.launcher(handle.backend)?;
        bounded(self.config.op_timeout, "kill", id, launcher.stop(id)).await
    }

    /// Drop handles whose unit is no longer alive.
    pub async fn reap(&mut self) -> Vec<InstanceHandle> {
        let mut dead = HashSet::new();
        for handle in &self.handles {
            let Some(launcher) = self.launchers.get(&handle.backend) else {
                continue;
            };
            match tokio::time::timeout(self.config.op_timeout, launcher.is_alive(&handle.id)).await
            {
                Ok(false) => {
                    dead.insert(handle.id.clone());
                }
                Ok(true) => {}
                Err(_) => debug!(id = %handle.id, "liveness check timed out, keeping handle"),
            }
        }
        if dead.is_empty() {
            return Vec::new();
        }

        let (reaped, live): (Vec<_>, Vec<_>) = self
            .handles
            .drain(..)
            .partition(|h| dead.contains(&h.id));
        self.handles = live;
        self.stats.reaped += reaped.len() as u64;
        for h in &reaped {
            warn!(id = %h.id, kind = %h.kind, "worker no longer alive, handle dropped");
        }
        reaped
    }

    fn launcher(&self, backend: BackendKind) -> FleetResult<Arc<dyn Launcher>> {
        self.launchers
            .get(&backend)
            .cloned()
            .ok_or(FleetError::NoLauncher(backend))
    }

    async fn start_units(&mut self, count: u32) -> (Vec<UnitId>, Vec<String>) {
        let mut started = Vec::new();
        let mut failures = Vec::new();
        for _ in 0..count {
            let Some(kind) = self.choose_kind(Instant::now()) else {
                failures.push("every worker kind is in restart backoff".to_string());
                continue;
            };
            match self.start_with_retries(kind).await {
                Ok(id) => started.push(id),
                Err(e) => failures.push(e),
            }
        }
        (started, failures)
    }

    /// Primary until `max_primary` are live, then secondary. A kind in
    /// restart backoff is skipped.
    fn choose_kind(&self, now: Instant) -> Option<InstanceKind> {
        let preferred = if self.count_kind(InstanceKind::Primary) < self.config.max_primary {
            InstanceKind::Primary
        } else {
            InstanceKind::Secondary
        };
        if !self.in_backoff(preferred, now) {
            return Some(preferred);
        }
        if preferred == InstanceKind::Primary && !self.in_backoff(InstanceKind::Secondary, now) {
            return Some(InstanceKind::Secondary);
        }
        None
    }

    fn in_backoff(&self, kind: InstanceKind, now: Instant) -> bool {
        self.backoff
            .get(&kind)
            .and_then(|b| b.until)
            .is_some_and(|until| now < until)
    }

    fn backoff_delay(&self, kind: InstanceKind) -> Duration {
        let failures = self.backoff.get(&kind).map_or(0, |b| b.failures);
        let factor = 2u32.saturating_pow(failures.saturating_sub(1).min(16));
        self.config
            .restart_delay
            .saturating_mul(factor)
            .min(self.config.max_restart_delay)
    }

    async fn start_with_retries(&mut self, kind: InstanceKind) -> Result<UnitId, String> {
        let attempts = 1 + self.config.start_retries;
        let mut last_error = String::new();
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff_delay(kind)).await;
            }
            match self.start_one(kind).await {
                Ok(handle) => {
                    self.backoff.remove(&kind);
                    self.stats.started += 1;
                    let id = handle.id.clone();
                    self.handles.push(handle);
                    return Ok(id);
                }
                Err(e) => {
                    self.stats.start_failures += 1;
                    let entry = self.backoff.entry(kind).or_default();
                    entry.failures += 1;
                    let delay = self.backoff_delay(kind);
                    if let Some(b) = self.backoff.get_mut(&kind) {
                        b.until = Some(Instant::now() + delay);
                    }
                    warn!(%kind, attempt = attempt + 1, attempts, error = %e, backoff_ms = delay.as_millis() as u64, "worker start failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(last_error)
    }

    async fn start_one(&mut self, kind: InstanceKind) -> FleetResult<InstanceHandle> {
        self.next_seq += 1;
        let name = format!("{kind}-{}", self.next_seq);
        let worker: WorkerSpec = match kind {
            InstanceKind::Primary => self.config.primary.clone(),
            InstanceKind::Secondary => self.config.secondary.clone(),
        };
        let backend = worker.backend;
        let launcher = self.launcher(backend)?;

        let port = match backend {
            BackendKind::Simulated => None,
            BackendKind::Process | BackendKind::Container => self.allocate_port(),
        };
        let mut env = BTreeMap::new();
        env.insert("WORKER_ID".to_string(), name.clone());
        env.insert("WORKER_KIND".to_string(), kind.to_string());
        if let Some(port) = port {
            env.insert("WORKER_PORT".to_string(), port.to_string());
        }

        let spec = LaunchSpec {
            name: name.clone(),
            kind,
            worker,
            port,
            env,
        };
        let id = bounded(self.config.op_timeout, "start", &name, launcher.start(&spec)).await?;
        Ok(InstanceHandle {
            id,
            kind,
            backend,
            started_at: epoch_secs(),
            address: port.map(|p| format!("127.0.0.1:{p}")),
        })
    }

    /// Lowest port at or above `base_port` not held by a live unit.
    fn allocate_port(&self) -> Option<u16> {
        let used: HashSet<u16> = self
            .handles
            .iter()
            .filter_map(|h| h.address.as_deref())
            .filter_map(|a| a.rsplit(':').next())
            .filter_map(|p| p.parse().ok())
            .collect();
        (self.config.base_port..=u16::MAX).find(|p| !used.contains(p))
    }

    /// Stop up to `count` units: secondaries before primaries, newest first.
    async fn stop_units(&mut self, count: u32) -> (Vec<UnitId>, Vec<String>) {
        let mut victims: Vec<InstanceHandle> = self
            .handles
            .iter()
            .rev()
            .filter(|h| h.kind == InstanceKind::Secondary)
            .chain(
                self.handles
                    .iter()
                    .rev()
                    .filter(|h| h.kind == InstanceKind::Primary),
            )
            .cloned()
            .collect();
        victims.truncate(count as usize);

        let mut stopped = Vec::new();
        let mut failures = Vec::new();
        for victim in victims {
            let result = match self.launcher(victim.backend) {
                Ok(launcher) => {
                    bounded(self.config.op_timeout, "stop", &victim.id, launcher.stop(&victim.id))
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    self.handles.retain(|h| h.id != victim.id);
                    self.stats.stopped += 1;
                    debug!(id = %victim.id, kind = %victim.kind, "worker stopped");
                    stopped.push(victim.id);
                }
                Err(e) => {
                    warn!(id = %victim.id, error = %e, "worker stop failed");
                    failures.push(e.to_string());
                }
            }
        }
        (stopped, failures)
    }
}

async fn bounded<T>(
    timeout: Duration,
    op: &'static str,
    unit: &str,
    fut: impl Future<Output = FleetResult<T>>,
) -> FleetResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(FleetError::Timeout {
            op,
            unit: unit.to_string(),
            timeout,
        }),
    }
}
