//! Control loop driver.
//!
//! One task owns a [`Controller`] and runs it on a fixed interval. Each tick:
//!
//! ```text
//! reap dead handles
//!   → probe health ∥ collect metrics
//!   → decide → apply (unless paused or dry-run)
//!   → chaos timers (when enabled and running)
//!   → scheduled backup (when due)
//!   → Critical? emergency restore (rate-limited) or raise an alert
//!   → publish status
//! ```
//!
//! Operator commands arrive on an mpsc channel and are handled between ticks,
//! so a restore is never cut short by a shutdown request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use warden_api::{ApiState, ControlCommand, RunState, SharedStatus, StatusReport};
use warden_autoscale::{CooldownState, decide};
use warden_chaos::{ChaosInjector, ChaosSettings};
use warden_core::{
    BackupManifest, ChaosEvent, HealthLevel, HealthStatus, InstanceHandle, MetricsSnapshot,
    ScaleAction, ScalingDecision, ScalingEvent, ServiceHealth, WardenConfig, epoch_secs,
};
use warden_fleet::{ApplyOutcome, ServiceControl, SharedFleet};
use warden_health::{FleetFacts, HealthProber, HealthTracker, ProbeTarget, Transition, assess};
use warden_metrics::MetricsSource;
use warden_recovery::{RecoveryError, RecoveryOrchestrator};
use warden_state::StateStore;

/// Metrics snapshots kept in the state store.
const METRICS_HISTORY: usize = 240;

/// Loop state owned by the driver and borrowed into each tick.
#[derive(Debug)]
pub struct ControllerState {
    pub run_state: RunState,
    pub cooldowns: CooldownState,
    pub ticks: u64,
    pub started: Instant,
    pub last_metrics: Option<MetricsSnapshot>,
    pub last_decision: Option<ScalingDecision>,
    pub last_health: Option<HealthStatus>,
    pub last_backup_at: Option<Instant>,
    pub last_backup_id: Option<String>,
    pub last_backup_error: Option<String>,
    pub last_auto_restore: Option<Instant>,
    pub last_status_log: Instant,
    /// Set when the operator must act.
    pub alert: Option<String>,
    trackers: BTreeMap<String, HealthTracker>,
}

impl ControllerState {
    fn new(now: Instant) -> Self {
        Self {
            run_state: RunState::Running,
            cooldowns: CooldownState::new(),
            ticks: 0,
            started: now,
            last_metrics: None,
            last_decision: None,
            last_health: None,
            last_backup_at: None,
            last_backup_id: None,
            last_backup_error: None,
            last_auto_restore: None,
            last_status_log: now,
            alert: None,
            trackers: BTreeMap::new(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub reaped: Vec<InstanceHandle>,
    pub metrics: MetricsSnapshot,
    pub decision: ScalingDecision,
    /// `None` when nothing was applied (no action, paused or dry-run).
    pub applied: Option<ApplyOutcome>,
    pub health: HealthStatus,
    pub chaos: Vec<ChaosEvent>,
}

pub struct Controller {
    config: WardenConfig,
    store: StateStore,
    fleet: SharedFleet,
    prober: HealthProber,
    metrics: Arc<dyn MetricsSource>,
    chaos: Option<ChaosInjector>,
    recovery: Arc<RecoveryOrchestrator>,
    status: SharedStatus,
    state: ControllerState,
}

impl Controller {
    pub fn new(
        config: WardenConfig,
        store: StateStore,
        fleet: SharedFleet,
        metrics: Arc<dyn MetricsSource>,
        services: Arc<dyn ServiceControl>,
    ) -> Self {
        let now = Instant::now();
        let chaos = config.chaos.enabled.then(|| {
            ChaosInjector::new(
                ChaosSettings::resolve(&config.chaos),
                Arc::clone(&services),
                store.clone(),
                now,
            )
        });
        let recovery = Arc::new(RecoveryOrchestrator::new(
            config.recovery.clone(),
            store.clone(),
            Arc::clone(&fleet),
            services,
            config.scaling.min_instances,
        ));
        Self {
            prober: HealthProber::new(&config.health),
            config,
            store,
            fleet,
            metrics,
            chaos,
            recovery,
            status: Arc::new(RwLock::new(StatusReport::default())),
            state: ControllerState::new(now),
        }
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn fleet(&self) -> SharedFleet {
        Arc::clone(&self.fleet)
    }

    pub fn recovery(&self) -> Arc<RecoveryOrchestrator> {
        Arc::clone(&self.recovery)
    }

    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    /// Handler state for the management API, wired to `commands`.
    pub fn api_state(&self, commands: mpsc::Sender<ControlCommand>) -> ApiState {
        ApiState {
            status: self.status(),
            commands,
            store: self.store.clone(),
            backups: self.recovery.store().clone(),
        }
    }

    fn dry_run(&self) -> bool {
        self.config.control.dry_run
    }

    /// Bring the fleet up to its floor before the first tick.
    pub async fn startup(&mut self) {
        if let Some(pending) = self.recovery.pending_restore() {
            warn!(
                backup_id = %pending.backup_id,
                step = %pending.step,
                "previous restore did not complete; fleet starts critical"
            );
        }
        if self.dry_run() {
            info!("dry run: fleet left as found");
        } else {
            let min = self.config.scaling.min_instances;
            match self.fleet.lock().await.ensure_min(min).await {
                Ok(live) => info!(live, min, "fleet at minimum"),
                Err(e) => warn!(error = %e, "could not reach minimum at startup"),
            }
        }
        self.publish().await;
    }

    /// Run until `quit`, a shutdown signal, or `duration` elapses.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ControlCommand>,
        mut shutdown: watch::Receiver<bool>,
        duration: Option<Duration>,
    ) -> StatusReport {
        self.startup().await;

        let mut interval = tokio::time::interval(self.config.control.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = duration.map(|d| tokio::time::Instant::now() + d);

        info!(
            interval_secs = self.config.control.check_interval.as_secs(),
            dry_run = self.dry_run(),
            chaos = self.chaos.is_some(),
            "control loop running"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                Some(command) = commands.recv() => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    info!("shutdown requested");
                    break;
                }
                _ = sleep_until(deadline) => {
                    info!("run duration elapsed");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// One pass of the control loop.
    pub async fn tick(&mut self) -> TickOutcome {
        self.state.ticks += 1;
        let budget = self.config.control.tick_timeout;
        let tick = self.state.ticks;
        debug!(tick, "tick started");

        let reaped = match tokio::time::timeout(budget, self.reap()).await {
            Ok(reaped) => reaped,
            Err(_) => {
                warn!(tick, "reap timed out");
                Vec::new()
            }
        };

        let handles = self.fleet.lock().await.handles();
        let live = handles.len() as u32;
        let facts = FleetFacts {
            live_instances: live,
            min_instances: self.config.scaling.min_instances,
            restore_pending: self.recovery.restore_pending(),
        };
        let workers = self.worker_targets(&handles);

        let (health, metrics) = tokio::join!(
            tokio::time::timeout(budget, self.prober.probe(&workers, facts)),
            tokio::time::timeout(budget, self.metrics.collect(&handles)),
        );
        let mut health = health.unwrap_or_else(|_| {
            warn!(tick, "health probe timed out");
            self.timed_out_health(facts)
        });
        let metrics = metrics.unwrap_or_else(|_| {
            warn!(tick, "metrics collection timed out");
            MetricsSnapshot::zeroed(live)
        });
        self.track_transitions(&health.services);
        if let Err(e) = self.store.put_metrics(&metrics, METRICS_HISTORY) {
            warn!(error = %e, "failed to record metrics");
        }

        let now = epoch_secs();
        let decision = decide(&metrics, &self.config.scaling, &self.state.cooldowns, now);
        let applied = self.apply(&decision, now).await;
        if applied.as_ref().is_some_and(ApplyOutcome::changed) {
            let live = self.fleet.lock().await.live_count();
            health = self.reassess(&health, FleetFacts {
                live_instances: live,
                ..facts
            });
        }

        let chaos = match (&mut self.chaos, self.state.run_state) {
            (Some(chaos), RunState::Running) => {
                chaos.poll(Instant::now(), &self.fleet, self.config.control.dry_run).await
            }
            _ => Vec::new(),
        };

        self.scheduled_backup().await;

        if health.is_critical() {
            if self.critical(&health).await {
                let live = self.fleet.lock().await.live_count();
                health = self.reassess(&health, FleetFacts {
                    live_instances: live,
                    min_instances: self.config.scaling.min_instances,
                    restore_pending: self.recovery.restore_pending(),
                });
            }
        } else if self.state.alert.take().is_some() {
            info!("health no longer critical; alert cleared");
        }

        self.state.last_metrics = Some(metrics.clone());
        self.state.last_decision = Some(decision.clone());
        self.state.last_health = Some(health.clone());
        self.publish().await;
        self.maybe_log_status().await;

        TickOutcome {
            reaped,
            metrics,
            decision,
            applied,
            health,
            chaos,
        }
    }

    async fn reap(&self) -> Vec<InstanceHandle> {
        let reaped = self.fleet.lock().await.reap().await;
        if !reaped.is_empty() {
            info!(count = reaped.len(), "dead workers reaped");
        }
        reaped
    }

    fn worker_targets(&self, handles: &[InstanceHandle]) -> Vec<ProbeTarget> {
        if !self.config.health.probe_workers {
            return Vec::new();
        }
        handles
            .iter()
            .filter_map(|h| {
                let address = h.address.clone()?;
                Some(ProbeTarget {
                    name: format!("worker/{}", h.id),
                    address,
                    path: self.config.fleet.health_path.clone(),
                    core: false,
                    timeout: self.prober.default_timeout(),
                })
            })
            .collect()
    }

    fn timed_out_health(&self, facts: FleetFacts) -> HealthStatus {
        let mut status = assess(BTreeMap::new(), self.config.health.critical_floor, facts);
        if status.level == HealthLevel::Healthy {
            status.level = HealthLevel::Degraded;
        }
        status.reasons.push("health probe timed out".to_string());
        status
    }

    fn reassess(&self, health: &HealthStatus, facts: FleetFacts) -> HealthStatus {
        assess(
            health.services.clone(),
            self.config.health.critical_floor,
            facts,
        )
    }

    fn track_transitions(&mut self, services: &BTreeMap<String, ServiceHealth>) {
        let interval = self.config.control.check_interval;
        self.state.trackers.retain(|name, _| services.contains_key(name));
        for (name, health) in services {
            let tracker = self
                .state
                .trackers
                .entry(name.clone())
                .or_insert_with(|| HealthTracker::new(1, interval));
            match tracker.record(health.state) {
                Some(Transition::BecameUnhealthy) => warn!(service = %name, "service went unhealthy"),
                Some(Transition::Recovered) => info!(service = %name, "service recovered"),
                None => {}
            }
        }
    }

    async fn apply(&mut self, decision: &ScalingDecision, now: u64) -> Option<ApplyOutcome> {
        if decision.action == ScaleAction::None {
            debug!(
                instances = decision.current_instances,
                reason = %decision.reason,
                "no scaling action"
            );
            return None;
        }
        if self.dry_run() {
            info!(
                action = ?decision.action,
                from = decision.current_instances,
                to = decision.target_instances,
                reason = %decision.reason,
                "dry run: scaling not applied"
            );
            return None;
        }
        if self.state.run_state != RunState::Running {
            info!(
                action = ?decision.action,
                from = decision.current_instances,
                to = decision.target_instances,
                "paused: scaling not applied"
            );
            return None;
        }

        let outcome = self.fleet.lock().await.apply(decision).await;
        if outcome.changed() {
            self.state.cooldowns.record_applied(decision.action, now);
            let event = ScalingEvent {
                timestamp: now,
                action: decision.action,
                from: outcome.from,
                requested: outcome.requested,
                reached: outcome.reached,
                reason: decision.reason.clone(),
            };
            if let Err(e) = self.store.append_scaling_event(&event) {
                warn!(error = %e, "failed to record scaling event");
            }
        }
        Some(outcome)
    }

    async fn scheduled_backup(&mut self) {
        let Some(every) = self.config.recovery.backup_interval else {
            return;
        };
        if self.dry_run() {
            return;
        }
        let last = self.state.last_backup_at.unwrap_or(self.state.started);
        if last.elapsed() < every {
            return;
        }
        if self.recovery.restore_pending() {
            debug!("scheduled backup skipped: restore pending");
            return;
        }
        debug!("scheduled backup due");
        // The next interval retries; the failure stays in the status report.
        if let Err(e) = self.backup().await {
            warn!(error = %e, "scheduled backup failed");
        }
    }

    async fn backup(&mut self) -> Result<BackupManifest, RecoveryError> {
        self.state.last_backup_at = Some(Instant::now());
        match self.recovery.backup().await {
            Ok(manifest) => {
                self.state.last_backup_id = Some(manifest.backup_id.clone());
                self.state.last_backup_error = None;
                Ok(manifest)
            }
            Err(e) => {
                self.state.last_backup_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// React to Critical health. Returns true if a restore ran to completion.
    async fn critical(&mut self, health: &HealthStatus) -> bool {
        error!(reasons = ?health.reasons, "fleet health critical");
        if !self.config.recovery.auto_restore {
            return false;
        }
        if self.dry_run() {
            warn!("dry run: emergency restore skipped");
            return false;
        }
        if self.state.run_state != RunState::Running {
            warn!("paused: emergency restore deferred");
            return false;
        }
        let cooldown = self.config.recovery.auto_restore_cooldown;
        if let Some(at) = self.state.last_auto_restore
            && at.elapsed() < cooldown
        {
            debug!(
                remaining_secs = cooldown.saturating_sub(at.elapsed()).as_secs(),
                "emergency restore cooling down"
            );
            return false;
        }

        let manifest = match self.recovery.store().latest_complete() {
            Ok(Some(manifest)) => manifest,
            Ok(None) => {
                let msg = "fleet critical and no complete backup exists; operator action required";
                error!("{msg}");
                self.state.alert = Some(msg.to_string());
                return false;
            }
            Err(e) => {
                error!(error = %e, "cannot read backup store");
                self.state.alert = Some(format!("fleet critical and backup store unreadable: {e}"));
                return false;
            }
        };

        self.state.last_auto_restore = Some(Instant::now());
        warn!(backup_id = %manifest.backup_id, "starting emergency restore");
        match self.recovery.restore(&manifest).await {
            Ok(()) => {
                self.state.alert = None;
                true
            }
            Err(e) => {
                error!(error = %e, "emergency restore failed");
                self.state.alert = Some(format!("emergency restore failed: {e}"));
                false
            }
        }
    }

    /// Handle one operator command. Returns false when the loop should stop.
    pub async fn handle_command(&mut self, command: ControlCommand) -> bool {
        debug!(?command, "operator command");
        match command {
            ControlCommand::Pause => {
                if self.state.run_state == RunState::Running {
                    self.state.run_state = RunState::Paused;
                    info!("control loop paused");
                }
            }
            ControlCommand::Resume => {
                if self.state.run_state == RunState::Paused {
                    self.state.run_state = RunState::Running;
                    info!("control loop resumed");
                }
            }
            ControlCommand::Backup => match self.backup().await {
                Ok(manifest) => info!(backup_id = %manifest.backup_id, "operator backup complete"),
                Err(e) => warn!(error = %e, "operator backup failed"),
            },
            ControlCommand::Restore { backup_id } => self.operator_restore(backup_id).await,
            ControlCommand::Status => {
                self.publish().await;
                log_status(&*self.status.read().await);
                self.state.last_status_log = Instant::now();
            }
            ControlCommand::Quit => {
                info!("quit requested");
                return false;
            }
        }
        self.publish().await;
        true
    }

    async fn operator_restore(&mut self, backup_id: Option<String>) {
        if self.dry_run() {
            warn!(?backup_id, "dry run: restore skipped");
            return;
        }
        let result = match &backup_id {
            Some(id) => self.recovery.restore_by_id(id).await,
            None => self.recovery.restore_latest().await,
        };
        match result {
            Ok(manifest) => {
                info!(backup_id = %manifest.backup_id, "operator restore complete");
                self.state.alert = None;
            }
            Err(e) => {
                error!(error = %e, "operator restore failed");
                if matches!(e, RecoveryError::Critical { .. }) {
                    self.state.alert = Some(format!("restore failed: {e}"));
                }
            }
        }
    }

    /// Stop the loop: workers down (unless dry-run), final report out.
    pub async fn shutdown(&mut self) -> StatusReport {
        self.state.run_state = RunState::Stopped;
        if !self.dry_run() {
            let budget = self.config.control.tick_timeout;
            let stopped = tokio::time::timeout(budget, async {
                self.fleet.lock().await.stop_all().await
            })
            .await;
            match stopped {
                Ok(Ok(count)) => debug!(count, "workers stopped for shutdown"),
                Ok(Err(e)) => warn!(error = %e, "some workers did not stop"),
                Err(_) => warn!("worker shutdown timed out"),
            }
        }
        self.publish().await;
        let report = self.status.read().await.clone();
        log_status(&report);
        info!("control loop stopped");
        report
    }

    async fn publish(&self) {
        let (instances, fleet) = {
            let fleet = self.fleet.lock().await;
            (fleet.handles(), fleet.stats())
        };
        let report = StatusReport {
            state: self.state.run_state,
            dry_run: self.dry_run(),
            chaos_enabled: self.chaos.is_some(),
            ticks: self.state.ticks,
            uptime_secs: self.state.started.elapsed().as_secs(),
            min_instances: self.config.scaling.min_instances,
            max_instances: self.config.scaling.max_instances,
            instances,
            last_metrics: self.state.last_metrics.clone(),
            last_decision: self.state.last_decision.clone(),
            health: self.state.last_health.clone(),
            fleet,
            chaos_attempts: self.chaos.as_ref().map_or(0, ChaosInjector::attempts),
            chaos_kills: self.chaos.as_ref().map_or(0, ChaosInjector::kills),
            recovery: self.recovery.stats(),
            last_backup: self.state.last_backup_id.clone(),
            backup_error: self.state.last_backup_error.clone(),
            alert: self.state.alert.clone(),
        };
        *self.status.write().await = report;
    }

    async fn maybe_log_status(&mut self) {
        if self.state.last_status_log.elapsed() < self.config.control.status_interval {
            return;
        }
        self.state.last_status_log = Instant::now();
        log_status(&*self.status.read().await);
    }
}

fn log_status(report: &StatusReport) {
    info!(
        state = ?report.state,
        instances = report.instance_count(),
        ticks = report.ticks,
        uptime_secs = report.uptime_secs,
        health = ?report.health.as_ref().map(|h| h.level),
        started = report.fleet.started,
        stopped = report.fleet.stopped,
        start_failures = report.fleet.start_failures,
        reaped = report.fleet.reaped,
        chaos_attempts = report.chaos_attempts,
        chaos_kills = report.chaos_kills,
        backups = report.recovery.backups_taken,
        restores = report.recovery.restores_completed,
        backup_error = report.backup_error.as_deref().unwrap_or("none"),
        alert = report.alert.as_deref().unwrap_or("none"),
        "status report"
    );
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use warden_core::config::{FleetConfig, RecoveryConfig, ScalingConfig};
    use warden_fleet::{LifecycleManager, SimulatedServices};
    use warden_metrics::FixedMetricsSource;

    fn config(dir: &Path, min: u32, max: u32) -> WardenConfig {
        WardenConfig {
            scaling: ScalingConfig {
                min_instances: min,
                max_instances: max,
                scale_up_threshold: 80.0,
                scale_down_threshold: 20.0,
                scale_up_cooldown: Duration::from_secs(60),
                scale_down_cooldown: Duration::from_secs(300),
                cpu_threshold: 90.0,
                memory_threshold: 90.0,
                throughput_threshold: 6000.0,
                weight_cpu: 0.4,
                weight_memory: 0.3,
                weight_throughput: 0.3,
                scale_up_step: 2,
                scale_down_step: 1,
            },
            fleet: FleetConfig::default(),
            health: Default::default(),
            chaos: Default::default(),
            recovery: RecoveryConfig {
                backup_dir: dir.join("backups"),
                journal_dir: dir.join("data"),
                ..Default::default()
            },
            control: Default::default(),
        }
    }

    fn controller(config: WardenConfig, load: Arc<FixedMetricsSource>) -> Controller {
        let fleet = LifecycleManager::new(config.fleet.clone())
            .with_bounds(config.scaling.min_instances, config.scaling.max_instances)
            .into_shared();
        Controller::new(
            config,
            StateStore::open_in_memory().unwrap(),
            fleet,
            load,
            Arc::new(SimulatedServices::new(Vec::<String>::new())),
        )
    }

    #[tokio::test]
    async fn startup_fills_to_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(config(dir.path(), 3, 10), Arc::new(FixedMetricsSource::new(50.0, 50.0, 0.0)));
        c.startup().await;
        assert_eq!(c.fleet.lock().await.live_count(), 3);
        assert_eq!(c.status.read().await.instance_count(), 3);
    }

    #[tokio::test]
    async fn pressure_scales_up_and_records_event() {
        let dir = tempfile::tempdir().unwrap();
        let load = Arc::new(FixedMetricsSource::new(95.0, 95.0, 0.0));
        let mut c = controller(config(dir.path(), 2, 10), Arc::clone(&load));
        c.startup().await;

        let out = c.tick().await;
        assert_eq!(out.decision.action, ScaleAction::ScaleUp);
        assert_eq!(out.applied.unwrap().reached, 4);
        assert_eq!(c.store.recent_scaling_events(10).unwrap().len(), 1);

        // Cooldown holds the next scale-up back.
        let out = c.tick().await;
        assert_eq!(out.decision.action, ScaleAction::None);
        assert!(out.decision.reason.contains("cooldown"));
        assert_eq!(c.fleet.lock().await.live_count(), 4);
    }

    #[tokio::test]
    async fn paused_loop_decides_but_does_not_act() {
        let dir = tempfile::tempdir().unwrap();
        let load = Arc::new(FixedMetricsSource::new(95.0, 95.0, 0.0));
        let mut c = controller(config(dir.path(), 2, 10), load);
        c.startup().await;

        assert!(c.handle_command(ControlCommand::Pause).await);
        assert_eq!(c.status.read().await.state, RunState::Paused);
        let out = c.tick().await;
        assert_eq!(out.decision.action, ScaleAction::ScaleUp);
        assert!(out.applied.is_none());
        assert_eq!(c.fleet.lock().await.live_count(), 2);

        assert!(c.handle_command(ControlCommand::Resume).await);
        let out = c.tick().await;
        assert_eq!(out.applied.unwrap().reached, 4);
    }

    #[tokio::test]
    async fn quit_stops_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(config(dir.path(), 1, 3), Arc::new(FixedMetricsSource::default()));
        assert!(!c.handle_command(ControlCommand::Quit).await);
    }

    #[tokio::test]
    async fn critical_without_backup_raises_alert() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 1, 3);
        cfg.health.services.push(warden_core::config::ServiceEndpoint {
            name: "db".to_string(),
            address: "127.0.0.1:1".to_string(),
            path: "/health".to_string(),
            core: true,
            timeout: Some(Duration::from_millis(200)),
        });
        let mut c = controller(cfg, Arc::new(FixedMetricsSource::new(50.0, 50.0, 0.0)));
        c.startup().await;

        let out = c.tick().await;
        assert!(out.health.is_critical());
        let report = c.status.read().await.clone();
        assert!(report.alert.as_deref().unwrap_or_default().contains("no complete backup"));
    }

    #[tokio::test]
    async fn operator_backup_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(config(dir.path(), 1, 3), Arc::new(FixedMetricsSource::default()));
        c.startup().await;
        assert!(c.handle_command(ControlCommand::Backup).await);

        let report = c.status.read().await.clone();
        assert_eq!(report.recovery.backups_taken, 1);
        assert!(report.last_backup.is_some());
    }

    #[tokio::test]
    async fn failed_scheduled_backup_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("extra.yaml");
        let mut cfg = config(dir.path(), 1, 3);
        cfg.recovery.config_paths = vec![extra.clone()];
        cfg.recovery.backup_interval = Some(Duration::from_millis(1));
        let mut c = controller(cfg, Arc::new(FixedMetricsSource::new(50.0, 50.0, 0.0)));
        c.startup().await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        c.tick().await;
        let report = c.status.read().await.clone();
        assert!(report.backup_error.is_some());
        assert_eq!(report.recovery.backups_failed, 1);
        assert!(report.last_backup.is_none());

        std::fs::write(&extra, "a: 1\n").unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        c.tick().await;
        let report = c.status.read().await.clone();
        assert!(report.backup_error.is_none());
        assert!(report.last_backup.is_some());
    }

    #[tokio::test]
    async fn run_honours_duration() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 1, 3);
        cfg.control.check_interval = Duration::from_millis(20);
        let c = controller(cfg, Arc::new(FixedMetricsSource::new(50.0, 50.0, 0.0)));
        let (_tx, rx) = mpsc::channel(4);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let report = c.run(rx, stop_rx, Some(Duration::from_millis(150))).await;
        assert_eq!(report.state, RunState::Stopped);
        assert!(report.ticks >= 1);
        // Shutdown stops every worker.
        assert_eq!(report.instance_count(), 0);
    }
}
