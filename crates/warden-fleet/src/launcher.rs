//! Launcher capability trait and the in-process simulated backends.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tracing::debug;

use warden_core::config::WorkerSpec;
use warden_core::{BackendKind, InstanceKind, UnitId};

use crate::error::{FleetError, FleetResult};

/// Everything a backend needs to start one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    /// Unique unit name, e.g. `primary-3`.
    pub name: String,
    pub kind: InstanceKind,
    pub worker: WorkerSpec,
    pub port: Option<u16>,
    /// Variables set on top of `worker.env`.
    pub env: BTreeMap<String, String>,
}

/// Start, stop and observe worker units.
#[async_trait]
pub trait Launcher: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Start a unit and return its id.
    async fn start(&self, spec: &LaunchSpec) -> FleetResult<UnitId>;

    /// Stop a unit. Stopping an unknown or already dead unit succeeds.
    async fn stop(&self, id: &str) -> FleetResult<()>;

    async fn is_alive(&self, id: &str) -> bool;
}

/// Control over named dependency services that are not fleet workers.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Terminate abruptly.
    async fn kill(&self, name: &str) -> FleetResult<()>;

    async fn stop(&self, name: &str) -> FleetResult<()>;

    async fn start(&self, name: &str) -> FleetResult<()>;
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Workers that exist only as entries in a set.
#[derive(Debug, Default)]
pub struct SimulatedLauncher {
    alive: Mutex<HashSet<UnitId>>,
    fail_starts: AtomicU32,
    starts: AtomicU32,
    stops: AtomicU32,
}

impl SimulatedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` starts fail.
    pub fn fail_next_starts(&self, n: u32) {
        self.fail_starts.store(n, Ordering::SeqCst);
    }

    /// Mark a unit dead without going through `stop`, as a crash would.
    pub fn crash(&self, id: &str) -> bool {
        lock(&self.alive).remove(id)
    }

    pub fn alive_count(&self) -> usize {
        lock(&self.alive).len()
    }

    /// Successful starts so far.
    pub fn start_calls(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Launcher for SimulatedLauncher {
    fn backend(&self) -> BackendKind {
        BackendKind::Simulated
    }

    async fn start(&self, spec: &LaunchSpec) -> FleetResult<UnitId> {
        let should_fail = self
            .fail_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(FleetError::StartFailed {
                unit: spec.name.clone(),
                reason: "simulated start failure".to_string(),
            });
        }

        let id = format!("sim-{}", spec.name);
        lock(&self.alive).insert(id.clone());
        self.starts.fetch_add(1, Ordering::SeqCst);
        debug!(%id, kind = %spec.kind, "simulated worker started");
        Ok(id)
    }

    async fn stop(&self, id: &str) -> FleetResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        lock(&self.alive).remove(id);
        Ok(())
    }

    async fn is_alive(&self, id: &str) -> bool {
        lock(&self.alive).contains(id)
    }
}

/// Dependency services simulated in memory. Records every call.
#[derive(Debug, Default)]
pub struct SimulatedServices {
    running: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl SimulatedServices {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            running: Mutex::new(names.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Make every later call on `name` fail.
    pub fn fail(&self, name: &str) {
        lock(&self.failing).insert(name.to_string());
    }

    pub fn is_running(&self, name: &str) -> bool {
        lock(&self.running).contains(name)
    }

    /// Calls made so far, as `"<op> <name>"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn record(&self, op: &str, name: &str) -> FleetResult<()> {
        lock(&self.calls).push(format!("{op} {name}"));
        if lock(&self.failing).contains(name) {
            return Err(FleetError::Service {
                service: name.to_string(),
                reason: format!("simulated {op} failure"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceControl for SimulatedServices {
    async fn kill(&self, name: &str) -> FleetResult<()> {
        self.record("kill", name)?;
        lock(&self.running).remove(name);
        Ok(())
    }

    async fn stop(&self, name: &str) -> FleetResult<()> {
        self.record("stop", name)?;
        lock(&self.running).remove(name);
        Ok(())
    }

    async fn start(&self, name: &str) -> FleetResult<()> {
        self.record("start", name)?;
        lock(&self.running).insert(name.to_string());
        Ok(())
    }
}
