//! wardend — assembles the Warden subsystems into one control loop.
//!
//! The binary in `main.rs` parses the CLI and hands a loaded config to
//! [`assemble`]; tests build a [`Controller`] the same way with simulated
//! backends.

pub mod console;
pub mod driver;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use warden_core::WardenConfig;
use warden_fleet::{ContainerRuntime, LifecycleManager};
use warden_metrics::SystemMetricsCollector;
use warden_state::StateStore;

pub use driver::{Controller, ControllerState, TickOutcome};

/// Open the state store and wire every subsystem against real backends.
pub fn assemble(config: WardenConfig) -> anyhow::Result<Controller> {
    let store = open_store(&config)?;
    let fleet = LifecycleManager::new(config.fleet.clone())
        .with_bounds(config.scaling.min_instances, config.scaling.max_instances)
        .into_shared();
    let metrics = Arc::new(SystemMetricsCollector::from_config(
        &config.fleet,
        config.health.probe_timeout,
    ));
    let services = Arc::new(ContainerRuntime::new(
        config.fleet.container_runtime.clone(),
        config.fleet.op_timeout,
    ));
    Ok(Controller::new(config, store, fleet, metrics, services))
}

/// Open (creating if needed) the redb file named in `control.state_path`.
pub fn open_store(config: &WardenConfig) -> anyhow::Result<StateStore> {
    let path = &config.control.state_path;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create state directory {}", parent.display()))?;
    }
    let store = StateStore::open(path)
        .with_context(|| format!("open state store {}", path.display()))?;
    info!(path = ?path, "state store opened");
    Ok(store)
}
