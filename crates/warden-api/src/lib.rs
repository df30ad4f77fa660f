//! warden-api — management API for the fleet controller.
//!
//! Read endpoints serve the driver's last published [`StatusReport`] and the
//! state store. Write endpoints never act directly: they enqueue a
//! [`ControlCommand`] that the control loop handles between ticks.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/status` | Full status report |
//! | GET | `/api/v1/health` | Last health assessment (503 when critical) |
//! | GET | `/api/v1/instances` | Live worker handles |
//! | GET | `/api/v1/scaling/events` | Recent scaling events |
//! | GET | `/api/v1/metrics` | Recent metrics snapshots |
//! | GET | `/api/v1/chaos/events` | Recent chaos events |
//! | GET | `/api/v1/backups` | Complete backups, oldest first |
//! | POST | `/api/v1/backups` | Request a backup |
//! | POST | `/api/v1/restore` | Request a restore (latest or by id) |
//! | POST | `/api/v1/pause` | Pause scaling and chaos |
//! | POST | `/api/v1/resume` | Resume |

pub mod handlers;
pub mod status;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::mpsc;

use warden_recovery::BackupStore;
use warden_state::StateStore;

pub use status::{ControlCommand, RunState, SharedStatus, StatusReport};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub status: SharedStatus,
    pub commands: mpsc::Sender<ControlCommand>,
    pub store: StateStore,
    pub backups: BackupStore,
}

/// Build the API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/status", get(handlers::get_status))
        .route("/health", get(handlers::get_health))
        .route("/instances", get(handlers::list_instances))
        .route("/scaling/events", get(handlers::list_scaling_events))
        .route("/metrics", get(handlers::list_metrics))
        .route("/chaos/events", get(handlers::list_chaos_events))
        .route("/backups", get(handlers::list_backups).post(handlers::request_backup))
        .route("/restore", post(handlers::request_restore))
        .route("/pause", post(handlers::pause))
        .route("/resume", post(handlers::resume))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
