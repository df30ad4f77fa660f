//! Container backend driven through the docker/podman CLI.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use warden_core::{BackendKind, UnitId};

use crate::error::{FleetError, FleetResult};
use crate::launcher::{LaunchSpec, Launcher, ServiceControl};

/// Thin wrapper over a container CLI binary.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    binary: String,
    timeout: Duration,
}

impl ContainerRuntime {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Run the CLI and return trimmed stdout.
    async fn exec(&self, target: &str, args: &[String]) -> Result<String, String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("{}: {e}", self.binary)),
            Err(_) => return Err(format!("{} timed out after {:?}", self.binary, self.timeout)),
        };
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(%target, %stderr, "container command failed");
            Err(stderr)
        }
    }

    pub async fn run(&self, spec: &LaunchSpec) -> FleetResult<String> {
        self.exec(&spec.name, &run_args(spec))
            .await
            .map_err(|reason| FleetError::StartFailed {
                unit: spec.name.clone(),
                reason,
            })
    }

    /// Force-remove a container. Missing containers are not an error.
    pub async fn remove(&self, name: &str) -> FleetResult<()> {
        match self.exec(name, &args(&["rm", "-f", name])).await {
            Ok(_) => Ok(()),
            Err(reason) if is_missing(&reason) => Ok(()),
            Err(reason) => Err(FleetError::StopFailed {
                unit: name.to_string(),
                reason,
            }),
        }
    }

    pub async fn is_running(&self, name: &str) -> bool {
        matches!(
            self.exec(name, &args(&["inspect", "-f", "{{.State.Running}}", name])).await,
            Ok(out) if out == "true"
        )
    }

    async fn service_op(&self, op: &str, name: &str) -> FleetResult<()> {
        self.exec(name, &args(&[op, name]))
            .await
            .map(|_| ())
            .map_err(|reason| FleetError::Service {
                service: name.to_string(),
                reason,
            })
    }
}

#[async_trait]
impl ServiceControl for ContainerRuntime {
    async fn kill(&self, name: &str) -> FleetResult<()> {
        self.service_op("kill", name).await?;
        warn!(container = %name, "container killed");
        Ok(())
    }

    async fn stop(&self, name: &str) -> FleetResult<()> {
        self.service_op("stop", name).await?;
        info!(container = %name, "container stopped");
        Ok(())
    }

    async fn start(&self, name: &str) -> FleetResult<()> {
        self.service_op("start", name).await?;
        info!(container = %name, "container started");
        Ok(())
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn is_missing(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container") || lower.contains("no container with name")
}

/// Arguments for `<runtime> run` for one worker unit.
pub fn run_args(spec: &LaunchSpec) -> Vec<String> {
    let mut out = args(&["run", "-d", "--name"]);
    out.push(spec.name.clone());
    if let Some(port) = spec.port {
        out.push("-p".to_string());
        out.push(format!("127.0.0.1:{port}:{port}"));
    }
    for (k, v) in spec.worker.env.iter().chain(spec.env.iter()) {
        out.push("-e".to_string());
        out.push(format!("{k}={v}"));
    }
    if let Some(dir) = &spec.worker.working_dir {
        out.push("-w".to_string());
        out.push(dir.display().to_string());
    }
    out.push(spec.worker.command.clone());
    out.extend(spec.worker.args.iter().cloned());
    out
}

/// Workers run as containers named after their unit.
#[derive(Debug, Clone)]
pub struct ContainerLauncher {
    runtime: ContainerRuntime,
}

impl ContainerLauncher {
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Launcher for ContainerLauncher {
    fn backend(&self) -> BackendKind {
        BackendKind::Container
    }

    async fn start(&self, spec: &LaunchSpec) -> FleetResult<UnitId> {
        // A leftover container with the same name would make `run` fail.
        let _ = self.runtime.remove(&spec.name).await;
        let container_id = self.runtime.run(spec).await?;
        info!(unit = %spec.name, %container_id, kind = %spec.kind, "worker container started");
        Ok(spec.name.clone())
    }

    async fn stop(&self, id: &str) -> FleetResult<()> {
        self.runtime.remove(id).await
    }

    async fn is_alive(&self, id: &str) -> bool {
        self.runtime.is_running(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use warden_core::InstanceKind;
    use warden_core::config::WorkerSpec;

    #[test]
    fn run_args_include_port_and_env() {
        let mut worker_env = BTreeMap::new();
        worker_env.insert("LOG_LEVEL".to_string(), "info".to_string());
        let mut env = BTreeMap::new();
        env.insert("WORKER_ID".to_string(), "primary-2".to_string());

        let spec = LaunchSpec {
            name: "primary-2".to_string(),
            kind: InstanceKind::Primary,
            worker: WorkerSpec {
                backend: BackendKind::Container,
                command: "registry.local/worker:1.4".to_string(),
                args: vec!["--fast".to_string()],
                env: worker_env,
                working_dir: None,
            },
            port: Some(18081),
            env,
        };

        assert_eq!(
            run_args(&spec),
            vec![
                "run",
                "-d",
                "--name",
                "primary-2",
                "-p",
                "127.0.0.1:18081:18081",
                "-e",
                "LOG_LEVEL=info",
                "-e",
                "WORKER_ID=primary-2",
                "registry.local/worker:1.4",
                "--fast",
            ]
        );
    }

    #[test]
    fn missing_container_messages() {
        assert!(is_missing("Error: No such container: primary-1"));
        assert!(is_missing("Error: no container with name or ID \"x\" found"));
        assert!(!is_missing("permission denied"));
    }

    #[tokio::test]
    async fn unavailable_runtime_reports_errors() {
        let runtime = ContainerRuntime::new("/nonexistent/docker", Duration::from_secs(1));
        assert!(!runtime.is_running("db").await);
        let err = ServiceControl::kill(&runtime, "db").await.unwrap_err();
        assert!(matches!(err, FleetError::Service { .. }));
    }
}
