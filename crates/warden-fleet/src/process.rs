//! Native process backend.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use warden_core::{BackendKind, UnitId};

use crate::error::{FleetError, FleetResult};
use crate::launcher::{LaunchSpec, Launcher};

/// Spawns workers as child processes of the control plane.
///
/// Children are killed when the launcher is dropped.
#[derive(Debug, Default)]
pub struct ProcessLauncher {
    children: Mutex<HashMap<UnitId, Child>>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    fn backend(&self) -> BackendKind {
        BackendKind::Process
    }

    async fn start(&self, spec: &LaunchSpec) -> FleetResult<UnitId> {
        let mut cmd = Command::new(&spec.worker.command);
        cmd.args(&spec.worker.args)
            .envs(&spec.worker.env)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &spec.worker.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| FleetError::StartFailed {
            unit: spec.name.clone(),
            reason: format!("spawn {}: {e}", spec.worker.command),
        })?;
        let pid = child.id().unwrap_or_default();

        let id = spec.name.clone();
        self.children.lock().await.insert(id.clone(), child);
        info!(%id, pid, kind = %spec.kind, port = ?spec.port, "worker process started");
        Ok(id)
    }

    async fn stop(&self, id: &str) -> FleetResult<()> {
        let Some(mut child) = self.children.lock().await.remove(id) else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!(%id, %status, "worker process already exited");
            return Ok(());
        }
        child.kill().await.map_err(|e| FleetError::StopFailed {
            unit: id.to_string(),
            reason: e.to_string(),
        })?;
        info!(%id, "worker process stopped");
        Ok(())
    }

    async fn is_alive(&self, id: &str) -> bool {
        let mut children = self.children.lock().await;
        match children.get_mut(id) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}
