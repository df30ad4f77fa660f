//! warden-health — health probing for the Warden control plane.
//!
//! Probes every configured dependency (and every worker that serves HTTP)
//! concurrently, then folds the per-service results into one
//! [`HealthStatus`](warden_core::HealthStatus) with an overall level.
//!
//! # Architecture
//!
//! ```text
//! HealthProber::probe()
//!   ├── JoinSet of http_probe() per target (each with its own timeout)
//!   └── assess() → Healthy | Degraded | Critical
//!
//! HealthTracker (per service, kept by the caller)
//!   └── consecutive failures + backoff, reports transitions
//! ```
//!
//! Probe errors never escape: a refused connection, a timeout, or a non-2xx
//! answer are all simply `Unhealthy`.

pub mod checker;
pub mod prober;

pub use checker::{HealthTracker, HttpError, Transition, http_get, http_probe};
pub use prober::{FleetFacts, HealthProber, ProbeTarget, assess, probe_all};
