//! REST API handlers.
//!
//! Reads come from the published status report and the state store.
//! Control endpoints only enqueue a command and answer `202 Accepted`.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{debug, warn};

use warden_recovery::RecoveryError;

use crate::ApiState;
use crate::status::ControlCommand;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// `?limit=` for the event listings.
#[derive(Debug, serde::Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn resolve(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

async fn enqueue(state: &ApiState, command: ControlCommand) -> axum::response::Response {
    debug!(?command, "command received over api");
    match state.commands.send(command.clone()).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({ "queued": command })),
        )
            .into_response(),
        Err(_) => {
            warn!("control loop is gone; command dropped");
            error_response("controller is shutting down", StatusCode::SERVICE_UNAVAILABLE)
                .into_response()
        }
    }
}

// ── Status ─────────────────────────────────────────────────────

/// GET /api/v1/status
pub async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    let report = state.status.read().await.clone();
    ApiResponse::ok(report)
}

/// GET /api/v1/health
pub async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
    let health = state.status.read().await.health.clone();
    match health {
        Some(health) if health.is_critical() => {
            (StatusCode::SERVICE_UNAVAILABLE, ApiResponse::ok(health)).into_response()
        }
        Some(health) => ApiResponse::ok(health).into_response(),
        None => error_response("no health assessment yet", StatusCode::SERVICE_UNAVAILABLE)
            .into_response(),
    }
}

/// GET /api/v1/instances
pub async fn list_instances(State(state): State<ApiState>) -> impl IntoResponse {
    let instances = state.status.read().await.instances.clone();
    ApiResponse::ok(instances)
}

// ── History ────────────────────────────────────────────────────

/// GET /api/v1/scaling/events
pub async fn list_scaling_events(
    State(state): State<ApiState>,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    match state.store.recent_scaling_events(q.resolve()) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/metrics
pub async fn list_metrics(
    State(state): State<ApiState>,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    match state.store.recent_metrics(q.resolve()) {
        Ok(snapshots) => ApiResponse::ok(snapshots).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/chaos/events
pub async fn list_chaos_events(
    State(state): State<ApiState>,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    match state.store.recent_chaos_events(q.resolve()) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Backups ────────────────────────────────────────────────────

/// GET /api/v1/backups
pub async fn list_backups(State(state): State<ApiState>) -> impl IntoResponse {
    match state.backups.list_complete() {
        Ok(manifests) => ApiResponse::ok(manifests).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/backups
pub async fn request_backup(State(state): State<ApiState>) -> impl IntoResponse {
    enqueue(&state, ControlCommand::Backup).await
}

/// Restore request body. No id means the newest complete backup.
#[derive(Debug, Default, serde::Deserialize)]
pub struct RestoreRequest {
    #[serde(default)]
    pub backup_id: Option<String>,
}

/// POST /api/v1/restore
pub async fn request_restore(
    State(state): State<ApiState>,
    body: Bytes,
) -> impl IntoResponse {
    let req: RestoreRequest = if body.is_empty() {
        RestoreRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                return error_response(&format!("invalid request body: {e}"), StatusCode::BAD_REQUEST)
                    .into_response();
            }
        }
    };

    // Refuse obviously bad targets before the control loop quiesces anything.
    let check = match &req.backup_id {
        Some(id) => state.backups.get(id).map(|_| ()),
        None => state
            .backups
            .latest_complete()
            .and_then(|m| m.map(|_| ()).ok_or(RecoveryError::NoBackup)),
    };
    match check {
        Ok(()) => {}
        Err(e @ RecoveryError::NotFound(_)) | Err(e @ RecoveryError::NoBackup) => {
            return error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response();
        }
        Err(e @ RecoveryError::InvalidId(_)) => {
            return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
        }
        Err(e @ RecoveryError::Incomplete(_)) => {
            return error_response(&e.to_string(), StatusCode::CONFLICT).into_response();
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    }

    enqueue(
        &state,
        ControlCommand::Restore {
            backup_id: req.backup_id,
        },
    )
    .await
}

// ── Control ────────────────────────────────────────────────────

/// POST /api/v1/pause
pub async fn pause(State(state): State<ApiState>) -> impl IntoResponse {
    enqueue(&state, ControlCommand::Pause).await
}

/// POST /api/v1/resume
pub async fn resume(State(state): State<ApiState>) -> impl IntoResponse {
    enqueue(&state, ControlCommand::Resume).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use tokio::sync::{RwLock, mpsc};
    use warden_core::{
        BackendKind, BackupManifest, HealthLevel, HealthStatus, InstanceHandle, InstanceKind,
    };
    use warden_recovery::BackupStore;
    use warden_state::StateStore;

    use crate::status::StatusReport;

    fn test_state(dir: &std::path::Path) -> (ApiState, mpsc::Receiver<ControlCommand>) {
        let (tx, rx) = mpsc::channel(8);
        let state = ApiState {
            status: Arc::new(RwLock::new(StatusReport::default())),
            commands: tx,
            store: StateStore::open_in_memory().unwrap(),
            backups: BackupStore::new(dir),
        };
        (state, rx)
    }

    fn commit_backup(store: &BackupStore, stamp: u64) -> String {
        let (id, _) = store.create(stamp).unwrap();
        store
            .commit(&BackupManifest {
                backup_id: id.clone(),
                created_at: stamp,
                component_list: vec![],
                source_version: "0.1.0".to_string(),
            })
            .unwrap();
        id
    }

    #[tokio::test]
    async fn status_returns_report() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _rx) = test_state(dir.path());
        state.status.write().await.ticks = 7;

        let resp = get_status(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_unavailable_until_assessed_and_when_critical() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _rx) = test_state(dir.path());

        let resp = get_health(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.status.write().await.health = Some(HealthStatus {
            services: BTreeMap::new(),
            level: HealthLevel::Degraded,
            reasons: vec!["1/2 services healthy".to_string()],
        });
        let resp = get_health(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        state.status.write().await.health = Some(HealthStatus {
            services: BTreeMap::new(),
            level: HealthLevel::Critical,
            reasons: vec!["restore incomplete".to_string()],
        });
        let resp = get_health(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn instances_come_from_status() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _rx) = test_state(dir.path());
        state.status.write().await.instances = vec![InstanceHandle {
            id: "sim-worker-1".to_string(),
            kind: InstanceKind::Primary,
            backend: BackendKind::Simulated,
            started_at: 1,
            address: None,
        }];
        let resp = list_instances(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn event_listings_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _rx) = test_state(dir.path());
        let q = || Query(LimitQuery { limit: Some(5) });

        let resp = list_chaos_events(State(state.clone()), q()).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = list_scaling_events(State(state.clone()), q()).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = list_metrics(State(state), q()).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(LimitQuery { limit: None }.resolve(), DEFAULT_LIMIT);
        assert_eq!(LimitQuery { limit: Some(0) }.resolve(), 1);
        assert_eq!(LimitQuery { limit: Some(1_000_000) }.resolve(), MAX_LIMIT);
    }

    #[tokio::test]
    async fn pause_and_resume_enqueue_commands() {
        let dir = tempfile::tempdir().unwrap();
        let (state, mut rx) = test_state(dir.path());

        let resp = pause(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let resp = resume(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        assert_eq!(rx.recv().await, Some(ControlCommand::Pause));
        assert_eq!(rx.recv().await, Some(ControlCommand::Resume));
    }

    #[tokio::test]
    async fn closed_channel_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (state, rx) = test_state(dir.path());
        drop(rx);
        let resp = request_backup(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn restore_without_backups_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (state, mut rx) = test_state(dir.path());
        let resp = request_restore(State(state), Bytes::new()).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn restore_by_id_validates_target() {
        let dir = tempfile::tempdir().unwrap();
        let (state, mut rx) = test_state(dir.path());
        let good = commit_backup(&state.backups, 1000);
        let (partial, _) = state.backups.create(2000).unwrap();

        let body = |id: &str| Bytes::from(format!(r#"{{"backup_id":"{id}"}}"#));

        let resp = request_restore(State(state.clone()), body("backup-42"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = request_restore(State(state.clone()), body("../backups"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = request_restore(State(state.clone()), body(&partial))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = request_restore(State(state), body(&good)).await.into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(
            rx.recv().await,
            Some(ControlCommand::Restore {
                backup_id: Some(good)
            })
        );
    }

    #[tokio::test]
    async fn list_backups_skips_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _rx) = test_state(dir.path());
        commit_backup(&state.backups, 1000);
        state.backups.create(2000).unwrap();

        let resp = list_backups(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_restore_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _rx) = test_state(dir.path());
        let resp = request_restore(State(state), Bytes::from_static(b"{not json"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
