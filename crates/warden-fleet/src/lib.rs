//! warden-fleet — worker lifecycle management.
//!
//! Owns every live worker handle and turns scaling decisions into concrete
//! start/stop calls against a [`Launcher`] backend.
//!
//! # Architecture
//!
//! ```text
//! SharedFleet = Arc<Mutex<LifecycleManager>>
//!   └── LifecycleManager
//!       ├── handles (oldest first)
//!       ├── per-kind restart backoff
//!       └── launchers by BackendKind
//!           ├── ProcessLauncher   (tokio::process)
//!           ├── ContainerLauncher (docker/podman CLI)
//!           └── SimulatedLauncher (in-process)
//! ```
//!
//! The fleet mutex is the one serialization point for scaling, chaos kills
//! and recovery. Dependency containers that are not fleet workers are
//! controlled through [`ServiceControl`].

pub mod container;
pub mod error;
pub mod launcher;
pub mod manager;
pub mod process;

pub use container::{ContainerLauncher, ContainerRuntime};
pub use error::{FleetError, FleetResult};
pub use launcher::{LaunchSpec, Launcher, ServiceControl, SimulatedLauncher, SimulatedServices};
pub use manager::{ApplyOutcome, FleetStats, LifecycleManager, SharedFleet};
pub use process::ProcessLauncher;
