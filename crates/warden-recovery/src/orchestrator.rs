//! Disaster recovery orchestrator.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{error, info, warn};

use warden_core::config::RecoveryConfig;
use warden_core::{BackupManifest, epoch_millis};
use warden_fleet::{LifecycleManager, ServiceControl, SharedFleet};
use warden_state::StateStore;

use crate::component::{BackupComponent, verify};
use crate::error::{RecoveryError, RecoveryResult};
use crate::journal::{JournalEntry, RestoreJournal};
use crate::store::BackupStore;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RecoveryStats {
    pub backups_taken: u64,
    pub backups_failed: u64,
    pub restores_completed: u64,
    pub restores_failed: u64,
    pub restore_pending: bool,
}

pub struct RecoveryOrchestrator {
    config: RecoveryConfig,
    store: BackupStore,
    journal: RestoreJournal,
    components: Vec<BackupComponent>,
    services: Arc<dyn ServiceControl>,
    fleet: SharedFleet,
    min_instances: u32,
    source_version: String,
    backups_taken: AtomicU64,
    backups_failed: AtomicU64,
    restores_completed: AtomicU64,
    restores_failed: AtomicU64,
}

impl RecoveryOrchestrator {
    /// Components: the state store always, configuration and artifacts when
    /// paths are configured.
    pub fn new(
        config: RecoveryConfig,
        state: StateStore,
        fleet: SharedFleet,
        services: Arc<dyn ServiceControl>,
        min_instances: u32,
    ) -> Self {
        let mut components = vec![BackupComponent::StateStore(state)];
        if !config.config_paths.is_empty() {
            components.push(BackupComponent::Configuration(config.config_paths.clone()));
        }
        if !config.artifact_dirs.is_empty() {
            components.push(BackupComponent::Artifacts(config.artifact_dirs.clone()));
        }
        Self {
            store: BackupStore::new(config.backup_dir.clone()),
            journal: RestoreJournal::new(&config.journal_dir),
            config,
            components,
            services,
            fleet,
            min_instances,
            source_version: env!("CARGO_PKG_VERSION").to_string(),
            backups_taken: AtomicU64::new(0),
            backups_failed: AtomicU64::new(0),
            restores_completed: AtomicU64::new(0),
            restores_failed: AtomicU64::new(0),
        }
    }

    pub fn with_source_version(mut self, version: impl Into<String>) -> Self {
        self.source_version = version.into();
        self
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    pub fn list_backups(&self) -> RecoveryResult<Vec<BackupManifest>> {
        self.store.list_complete()
    }

    /// A restore started and never finished.
    pub fn restore_pending(&self) -> bool {
        self.journal.is_pending()
    }

    pub fn pending_restore(&self) -> Option<JournalEntry> {
        self.journal.read()
    }

    pub fn stats(&self) -> RecoveryStats {
        RecoveryStats {
            backups_taken: self.backups_taken.load(Ordering::Relaxed),
            backups_failed: self.backups_failed.load(Ordering::Relaxed),
            restores_completed: self.restores_completed.load(Ordering::Relaxed),
            restores_failed: self.restores_failed.load(Ordering::Relaxed),
            restore_pending: self.restore_pending(),
        }
    }

    /// Capture every component, then commit the manifest.
    ///
    /// On failure the backup directory is left without a manifest. Refused
    /// while a restore is pending: the system is between two snapshots.
    pub async fn backup(&self) -> RecoveryResult<BackupManifest> {
        let _quiesced = self.fleet.lock().await;
        if let Some(pending) = self.journal.read() {
            warn!(
                backup_id = %pending.backup_id,
                step = %pending.step,
                "backup refused while a restore is pending"
            );
            return Err(RecoveryError::RestorePending(pending.backup_id));
        }
        match self.capture_all().await {
            Ok(manifest) => {
                self.backups_taken.fetch_add(1, Ordering::Relaxed);
                info!(
                    backup_id = %manifest.backup_id,
                    components = manifest.component_list.len(),
                    "backup complete"
                );
                if let Err(e) = self.store.prune(self.config.retain.max(1)) {
                    warn!(error = %e, "backup pruning failed");
                }
                Ok(manifest)
            }
            Err(e) => {
                self.backups_failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "backup failed");
                Err(e)
            }
        }
    }

    async fn capture_all(&self) -> RecoveryResult<BackupManifest> {
        let created_at = epoch_millis();
        let (backup_id, dir) = self.store.create(created_at)?;
        let mut component_list = Vec::with_capacity(self.components.len());
        for component in &self.components {
            let c = component.clone();
            let d = dir.clone();
            let step = format!("backup {}", component.name());
            component_list.push(self.blocking(&step, move || c.capture(&d)).await?);
        }

        let manifest = BackupManifest {
            backup_id,
            created_at,
            component_list,
            source_version: self.source_version.clone(),
        };
        self.store.commit(&manifest)?;
        Ok(manifest)
    }

    /// Restore the newest complete backup.
    pub async fn restore_latest(&self) -> RecoveryResult<BackupManifest> {
        let manifest = self.store.latest_complete()?.ok_or(RecoveryError::NoBackup)?;
        self.restore(&manifest).await?;
        Ok(manifest)
    }

    pub async fn restore_by_id(&self, backup_id: &str) -> RecoveryResult<BackupManifest> {
        let manifest = self.store.get(backup_id)?;
        self.restore(&manifest).await?;
        Ok(manifest)
    }

    /// Restore `manifest` against a quiesced fleet.
    ///
    /// Any failing step aborts the rest and returns
    /// [`RecoveryError::Critical`]; the journal stays behind.
    pub async fn restore(&self, manifest: &BackupManifest) -> RecoveryResult<()> {
        let mut fleet = self.fleet.lock().await;
        let dir = self.store.backup_path(&manifest.backup_id);
        let mut entry = JournalEntry {
            backup_id: manifest.backup_id.clone(),
            started_at: epoch_millis(),
            step: "begin".to_string(),
        };
        self.journal.write(&entry).map_err(|e| RecoveryError::Critical {
            step: "write journal".to_string(),
            reason: e.to_string(),
        })?;
        warn!(backup_id = %manifest.backup_id, "restore started");

        match self.run_restore(&mut fleet, manifest, &dir, &mut entry).await {
            Ok(()) => {
                self.journal.clear().map_err(|e| RecoveryError::Critical {
                    step: "clear journal".to_string(),
                    reason: e.to_string(),
                })?;
                self.restores_completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    backup_id = %manifest.backup_id,
                    instances = fleet.live_count(),
                    "restore complete"
                );
                Ok(())
            }
            Err(e) => {
                self.restores_failed.fetch_add(1, Ordering::Relaxed);
                error!(backup_id = %manifest.backup_id, error = %e, "restore aborted, fleet critical");
                Err(e)
            }
        }
    }

    async fn run_restore(
        &self,
        fleet: &mut LifecycleManager,
        manifest: &BackupManifest,
        dir: &Path,
        entry: &mut JournalEntry,
    ) -> RecoveryResult<()> {
        self.step(entry, "stop workers", async {
            fleet.stop_all().await?;
            Ok::<(), RecoveryError>(())
        })
        .await?;

        self.step(entry, "stop services", async {
            for service in &self.config.dependent_services {
                self.services.stop(service).await?;
            }
            Ok::<(), RecoveryError>(())
        })
        .await?;

        let entries = manifest.component_list.clone();
        let d = dir.to_path_buf();
        self.step(
            entry,
            "verify checksums",
            self.blocking("verify checksums", move || {
                entries.iter().try_for_each(|e| verify(e, &d))
            }),
        )
        .await?;

        let mut ordered = manifest.component_list.clone();
        ordered.sort_by_key(|c| c.kind.restore_rank());
        for item in ordered {
            let Some(component) = self.components.iter().find(|c| c.name() == item.name) else {
                warn!(component = %item.name, "backup holds a component that is no longer configured, skipped");
                continue;
            };
            let c = component.clone();
            let d: PathBuf = dir.to_path_buf();
            let step = format!("restore {}", item.name);
            self.step(entry, &step, self.blocking(&step, move || c.restore(&d)))
                .await?;
        }

        self.step(entry, "start services", async {
            for service in &self.config.dependent_services {
                self.services.start(service).await?;
            }
            Ok::<(), RecoveryError>(())
        })
        .await?;

        let min = self.min_instances;
        self.step(entry, "restart workers", async {
            fleet.ensure_min(min).await?;
            Ok::<(), RecoveryError>(())
        })
        .await
    }

    /// Run one restore step under the step timeout, recording it in the journal.
    async fn step<T>(
        &self,
        entry: &mut JournalEntry,
        name: &str,
        fut: impl Future<Output = RecoveryResult<T>>,
    ) -> RecoveryResult<T> {
        entry.step = name.to_string();
        if let Err(e) = self.journal.write(entry) {
            warn!(error = %e, "failed to update restore journal");
        }
        info!(step = name, "restore step");

        let critical = |reason: String| RecoveryError::Critical {
            step: name.to_string(),
            reason,
        };
        match tokio::time::timeout(self.config.step_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(critical(e.to_string())),
            Err(_) => Err(critical(format!(
                "timed out after {:?}",
                self.config.step_timeout
            ))),
        }
    }

    /// Run file work off the async runtime, bounded by the step timeout.
    async fn blocking<T, F>(&self, step: &str, f: F) -> RecoveryResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> RecoveryResult<T> + Send + 'static,
    {
        let timeout = self.config.step_timeout;
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RecoveryError::Task(e.to_string())),
            Err(_) => Err(RecoveryError::Timeout {
                step: step.to_string(),
                timeout,
            }),
        }
    }
}
