//! Control loop scenarios against simulated workers.
//!
//! Each test builds a `Controller` with the simulated launcher and a fixed
//! metrics source, then drives individual ticks.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use warden_api::{ControlCommand, RunState};
use warden_core::config::{ChaosConfig, FleetConfig, RecoveryConfig, ScalingConfig};
use warden_core::{ChaosEvent, ChaosOutcome, HealthLevel, ScaleAction, TargetKind, WardenConfig};
use warden_fleet::{LifecycleManager, SimulatedLauncher, SimulatedServices};
use warden_metrics::FixedMetricsSource;
use warden_recovery::{JournalEntry, RestoreJournal};
use warden_state::StateStore;
use wardend::Controller;

fn scaling(min: u32, max: u32, cooldown: Duration) -> ScalingConfig {
    ScalingConfig {
        min_instances: min,
        max_instances: max,
        scale_up_threshold: 80.0,
        scale_down_threshold: 20.0,
        scale_up_cooldown: cooldown,
        scale_down_cooldown: cooldown,
        cpu_threshold: 90.0,
        memory_threshold: 90.0,
        throughput_threshold: 6000.0,
        weight_cpu: 0.4,
        weight_memory: 0.3,
        weight_throughput: 0.3,
        scale_up_step: 2,
        scale_down_step: 1,
    }
}

fn base_config(dir: &Path, scaling: ScalingConfig) -> WardenConfig {
    WardenConfig {
        scaling,
        fleet: FleetConfig::default(),
        health: Default::default(),
        chaos: ChaosConfig::default(),
        recovery: RecoveryConfig {
            backup_dir: dir.join("backups"),
            journal_dir: dir.join("data"),
            ..Default::default()
        },
        control: Default::default(),
    }
}

/// Chaos that fires on every process tick and then stays quiet.
fn eager_chaos() -> ChaosConfig {
    ChaosConfig {
        enabled: true,
        probability: Some(1.0),
        process_interval: Some(Duration::from_millis(1)),
        container_interval: Some(Duration::from_secs(3600)),
        recovery_time: Some(Duration::from_secs(3600)),
        max_concurrent_kills: Some(1),
        seed: Some(7),
        ..Default::default()
    }
}

struct Harness {
    controller: Controller,
    launcher: Arc<SimulatedLauncher>,
    load: Arc<FixedMetricsSource>,
    store: StateStore,
}

fn harness(config: WardenConfig, load: Arc<FixedMetricsSource>) -> Harness {
    let launcher = Arc::new(SimulatedLauncher::new());
    let fleet = LifecycleManager::new(config.fleet.clone())
        .with_launcher(launcher.clone())
        .with_bounds(config.scaling.min_instances, config.scaling.max_instances)
        .into_shared();
    let store = StateStore::open_in_memory().unwrap();
    let controller = Controller::new(
        config,
        store.clone(),
        fleet,
        load.clone(),
        Arc::new(SimulatedServices::new(["redis"])),
    );
    Harness {
        controller,
        launcher,
        load,
        store,
    }
}

#[tokio::test]
async fn dry_run_never_mutates_the_fleet() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), scaling(2, 10, Duration::ZERO));
    config.control.dry_run = true;
    config.chaos = eager_chaos();
    let mut h = harness(config, Arc::new(FixedMetricsSource::new(95.0, 95.0, 0.0)));

    // Pre-existing workers, started outside the controller.
    h.controller.fleet().lock().await.ensure_min(2).await.unwrap();
    let starts_before = h.launcher.start_calls();

    h.controller.startup().await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let out = h.controller.tick().await;

    assert_eq!(out.decision.action, ScaleAction::ScaleUp);
    assert!(out.applied.is_none());
    assert_eq!(out.chaos.len(), 1);
    assert_eq!(out.chaos[0].outcome, ChaosOutcome::DryRun);

    assert_eq!(h.launcher.start_calls(), starts_before);
    assert_eq!(h.launcher.stop_calls(), 0);
    assert_eq!(h.launcher.alive_count(), 2);
    assert!(h.store.recent_scaling_events(10).unwrap().is_empty());

    // Operator restore is refused too.
    assert!(
        h.controller
            .handle_command(ControlCommand::Restore { backup_id: None })
            .await
    );
    assert_eq!(h.controller.recovery().stats().restores_completed, 0);
}

#[tokio::test]
async fn chaos_kill_is_repaired_on_next_tick() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), scaling(3, 5, Duration::from_secs(60)));
    config.chaos = eager_chaos();
    // Score 35: inside the thresholds, so only the floor can move the fleet.
    let mut h = harness(config, Arc::new(FixedMetricsSource::new(50.0, 50.0, 0.0)));
    h.controller.startup().await;
    assert_eq!(h.launcher.alive_count(), 3);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let first = h.controller.tick().await;
    assert_eq!(first.chaos.len(), 1);
    assert_eq!(first.chaos[0].outcome, ChaosOutcome::Killed);
    assert_eq!(h.launcher.alive_count(), 2);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = h.controller.tick().await;
    assert_eq!(second.reaped.len(), 1);
    assert_eq!(second.decision.action, ScaleAction::ScaleUp);
    assert_eq!(second.decision.target_instances, 3);
    assert_eq!(second.applied.unwrap().reached, 3);
    assert!(second.chaos.is_empty(), "process kills are quiet while recovering");
    assert_eq!(h.launcher.alive_count(), 3);

    assert_eq!(h.store.chaos_event_count().unwrap(), 1);
    let report = h.controller.status().read().await.clone();
    assert_eq!(report.chaos_kills, 1);
    assert_eq!(report.fleet.reaped, 1);
}

#[tokio::test]
async fn instance_count_stays_within_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path(), scaling(2, 6, Duration::ZERO));
    let mut h = harness(config, Arc::new(FixedMetricsSource::new(50.0, 50.0, 0.0)));
    h.controller.startup().await;

    let loads = [
        (95.0, 95.0, 9000.0),
        (99.0, 20.0, 0.0),
        (85.0, 85.0, 7000.0),
        (95.0, 95.0, 9000.0),
        (5.0, 5.0, 0.0),
        (50.0, 50.0, 3000.0),
        (1.0, 1.0, 0.0),
        (0.0, 0.0, 0.0),
        (2.0, 3.0, 10.0),
        (0.0, 0.0, 0.0),
        (97.0, 10.0, 0.0),
    ];
    for (cpu, mem, tp) in loads {
        h.load.set(cpu, mem, tp);
        let out = h.controller.tick().await;
        let live = h.controller.fleet().lock().await.live_count();
        assert!((2..=6).contains(&live), "live {live} after {:?}", out.decision);
        assert!((2..=6).contains(&out.decision.target_instances));
    }
}

#[tokio::test]
async fn low_load_scales_down_by_one() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path(), scaling(2, 15, Duration::ZERO));
    let mut h = harness(config, Arc::new(FixedMetricsSource::new(95.0, 95.0, 0.0)));
    h.controller.fleet().lock().await.ensure_min(15).await.unwrap();

    h.load.set(5.0, 5.0, 0.0);
    let out = h.controller.tick().await;
    assert_eq!(out.decision.action, ScaleAction::ScaleDown);
    assert_eq!(out.decision.target_instances, 14);
    assert_eq!(h.launcher.alive_count(), 14);
}

#[tokio::test]
async fn interrupted_restore_keeps_fleet_critical() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), scaling(1, 3, Duration::from_secs(60)));
    config.recovery.auto_restore = false;
    let journal_dir = config.recovery.journal_dir.clone();
    let mut h = harness(config, Arc::new(FixedMetricsSource::new(50.0, 50.0, 0.0)));
    h.controller.startup().await;

    // A backup exists, then a restore dies half way.
    let manifest = h.controller.recovery().backup().await.unwrap();
    RestoreJournal::new(&journal_dir)
        .write(&JournalEntry {
            backup_id: manifest.backup_id.clone(),
            started_at: 1,
            step: "restore state".to_string(),
        })
        .unwrap();

    for _ in 0..2 {
        let out = h.controller.tick().await;
        assert_eq!(out.health.level, HealthLevel::Critical);
        assert!(out.health.reasons.iter().any(|r| r.contains("restore incomplete")));
    }

    // A completed restore clears the journal and the Critical level.
    assert!(
        h.controller
            .handle_command(ControlCommand::Restore {
                backup_id: Some(manifest.backup_id)
            })
            .await
    );
    let out = h.controller.tick().await;
    assert_eq!(out.health.level, HealthLevel::Healthy);
    assert!(!h.controller.recovery().restore_pending());
}

#[tokio::test]
async fn critical_health_triggers_emergency_restore_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path(), scaling(1, 3, Duration::from_secs(60)));
    let journal_dir = config.recovery.journal_dir.clone();
    let mut h = harness(config, Arc::new(FixedMetricsSource::new(50.0, 50.0, 0.0)));
    h.controller.startup().await;
    let manifest = h.controller.recovery().backup().await.unwrap();

    RestoreJournal::new(&journal_dir)
        .write(&JournalEntry {
            backup_id: manifest.backup_id,
            started_at: 1,
            step: "stop workers".to_string(),
        })
        .unwrap();

    let out = h.controller.tick().await;
    assert_eq!(out.health.level, HealthLevel::Healthy);
    assert_eq!(h.controller.recovery().stats().restores_completed, 1);
    assert!(h.controller.status().read().await.alert.is_none());
}

#[tokio::test]
async fn no_backup_is_taken_while_a_restore_is_pending() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), scaling(1, 3, Duration::from_secs(60)));
    config.recovery.backup_interval = Some(Duration::from_millis(1));
    let journal_dir = config.recovery.journal_dir.clone();
    let mut h = harness(config, Arc::new(FixedMetricsSource::new(50.0, 50.0, 0.0)));
    h.controller.startup().await;
    let good = h.controller.recovery().backup().await.unwrap();

    // Half way through a restore: the journal is down and state has drifted.
    RestoreJournal::new(&journal_dir)
        .write(&JournalEntry {
            backup_id: good.backup_id.clone(),
            started_at: 1,
            step: "restore config".to_string(),
        })
        .unwrap();
    h.store
        .append_chaos_event(&ChaosEvent {
            timestamp: 1,
            target: "half-restored".to_string(),
            target_kind: TargetKind::Process,
            outcome: ChaosOutcome::Killed,
            recovery_time_secs: 0,
            error: None,
        })
        .unwrap();

    // An operator backup is refused and reported.
    h.controller.handle_command(ControlCommand::Backup).await;
    let report = h.controller.status().read().await.clone();
    assert!(report.backup_error.unwrap().contains("pending"));

    tokio::time::sleep(Duration::from_millis(5)).await;
    let out = h.controller.tick().await;

    // The scheduled backup was skipped; the emergency restore used the good one.
    let backups = h.controller.recovery().list_backups().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].backup_id, good.backup_id);
    assert_eq!(out.health.level, HealthLevel::Healthy);
    assert_eq!(h.store.chaos_event_count().unwrap(), 0);

    // Once consistent again, scheduled backups resume.
    tokio::time::sleep(Duration::from_millis(5)).await;
    h.controller.tick().await;
    assert_eq!(h.controller.recovery().list_backups().unwrap().len(), 2);
    assert!(h.controller.status().read().await.backup_error.is_none());
}

#[tokio::test]
async fn restore_failing_between_components_stays_critical_until_retried() {
    let dir = tempfile::tempdir().unwrap();
    let config_file = dir.path().join("app.yaml");
    std::fs::write(&config_file, "mode: original\n").unwrap();

    let mut config = base_config(dir.path(), scaling(1, 3, Duration::from_secs(60)));
    config.recovery.auto_restore = false;
    config.recovery.config_paths = vec![config_file.clone()];
    let mut h = harness(config, Arc::new(FixedMetricsSource::new(50.0, 50.0, 0.0)));
    h.controller.startup().await;
    let manifest = h.controller.recovery().backup().await.unwrap();

    h.store
        .append_chaos_event(&ChaosEvent {
            timestamp: 2,
            target: "primary-1".to_string(),
            target_kind: TargetKind::Process,
            outcome: ChaosOutcome::Killed,
            recovery_time_secs: 0,
            error: None,
        })
        .unwrap();
    // The config target cannot be written: a directory is in the way.
    std::fs::remove_file(&config_file).unwrap();
    std::fs::create_dir(&config_file).unwrap();
    std::fs::write(config_file.join("blocker"), "x").unwrap();

    let restore = ControlCommand::Restore {
        backup_id: Some(manifest.backup_id.clone()),
    };
    h.controller.handle_command(restore.clone()).await;

    // State came back before the config step failed; the journal remains.
    assert_eq!(h.store.chaos_event_count().unwrap(), 0);
    let pending = h.controller.recovery().pending_restore().unwrap();
    assert_eq!(pending.step, "restore config");
    assert_eq!(h.controller.recovery().stats().restores_failed, 1);

    let out = h.controller.tick().await;
    assert_eq!(out.health.level, HealthLevel::Critical);
    assert!(out.health.reasons.iter().any(|r| r.contains("restore incomplete")));
    assert!(h.controller.status().read().await.alert.is_some());

    // Clear the obstruction and retry from the same backup.
    std::fs::remove_dir_all(&config_file).unwrap();
    h.controller.handle_command(restore).await;
    assert!(!h.controller.recovery().restore_pending());
    assert_eq!(std::fs::read_to_string(&config_file).unwrap(), "mode: original\n");

    let out = h.controller.tick().await;
    assert_eq!(out.health.level, HealthLevel::Healthy);
    assert_eq!(h.launcher.alive_count(), 1);
}

#[tokio::test]
async fn run_stops_on_quit_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), scaling(2, 4, Duration::from_secs(60)));
    config.control.check_interval = Duration::from_millis(10);
    let h = harness(config, Arc::new(FixedMetricsSource::new(50.0, 50.0, 0.0)));

    let (tx, rx) = tokio::sync::mpsc::channel(4);
    let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let status = h.controller.status();
    let task = tokio::spawn(h.controller.run(rx, stop_rx, None));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(status.read().await.instance_count(), 2);
    tx.send(ControlCommand::Pause).await.unwrap();
    tx.send(ControlCommand::Quit).await.unwrap();

    let report = task.await.unwrap();
    assert_eq!(report.state, RunState::Stopped);
    assert!(report.ticks >= 1);
    assert_eq!(h.launcher.alive_count(), 0);
}
