//! Chaos injector — timer, probability roll, target choice, kill.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use warden_core::{ChaosEvent, ChaosOutcome, TargetKind, epoch_millis};
use warden_fleet::{ServiceControl, SharedFleet};
use warden_state::StateStore;

use crate::settings::ChaosSettings;

/// Pick one candidate uniformly at random. Same inputs, same pick.
pub fn choose_target<T: Clone>(candidates: &[T], seed: u64) -> Option<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    candidates.choose(&mut rng).cloned()
}

pub struct ChaosInjector {
    settings: ChaosSettings,
    services: Arc<dyn ServiceControl>,
    store: StateStore,
    rng: StdRng,
    next_due: HashMap<TargetKind, Instant>,
    quiet_until: HashMap<TargetKind, Instant>,
    /// Kill times still inside their recovery window.
    live_kills: VecDeque<Instant>,
    attempts: u64,
    kills: u64,
}

impl ChaosInjector {
    /// Timers start at `started`; the first kill of each kind can happen one
    /// interval later.
    pub fn new(
        settings: ChaosSettings,
        services: Arc<dyn ServiceControl>,
        store: StateStore,
        started: Instant,
    ) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut next_due = HashMap::new();
        next_due.insert(TargetKind::Process, started + settings.process_interval);
        next_due.insert(TargetKind::Container, started + settings.container_interval);
        info!(
            probability = settings.probability,
            process_interval_secs = settings.process_interval.as_secs(),
            container_interval_secs = settings.container_interval.as_secs(),
            max_concurrent = settings.max_concurrent_kills,
            "chaos injector armed"
        );
        Self {
            settings,
            services,
            store,
            rng,
            next_due,
            quiet_until: HashMap::new(),
            live_kills: VecDeque::new(),
            attempts: 0,
            kills: 0,
        }
    }

    pub fn settings(&self) -> &ChaosSettings {
        &self.settings
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn kills(&self) -> u64 {
        self.kills
    }

    /// Kills whose recovery window has not elapsed at `now`.
    pub fn live_kills(&mut self, now: Instant) -> usize {
        let window = self.settings.recovery_time;
        while let Some(&at) = self.live_kills.front() {
            if now.duration_since(at) >= window {
                self.live_kills.pop_front();
            } else {
                break;
            }
        }
        self.live_kills.len()
    }

    /// Run every due timer once. Returns the attempts made.
    pub async fn poll(&mut self, now: Instant, fleet: &SharedFleet, dry_run: bool) -> Vec<ChaosEvent> {
        let mut events = Vec::new();
        for kind in [TargetKind::Process, TargetKind::Container] {
            if let Some(event) = self.poll_kind(kind, now, fleet, dry_run).await {
                events.push(event);
            }
        }
        events
    }

    async fn poll_kind(
        &mut self,
        kind: TargetKind,
        now: Instant,
        fleet: &SharedFleet,
        dry_run: bool,
    ) -> Option<ChaosEvent> {
        let due = self.next_due.get(&kind).copied()?;
        if now < due {
            return None;
        }
        let interval = match kind {
            TargetKind::Process => self.settings.process_interval,
            TargetKind::Container => self.settings.container_interval,
        };
        self.next_due.insert(kind, now + interval);

        if self.quiet_until.get(&kind).is_some_and(|until| now < *until) {
            debug!(%kind, "chaos timer due but kind is recovering");
            return None;
        }
        if self.live_kills(now) >= self.settings.max_concurrent_kills as usize {
            debug!(%kind, "chaos timer due but concurrent kill limit reached");
            return None;
        }
        if !self.rng.gen_bool(self.settings.probability) {
            debug!(%kind, "chaos roll missed");
            return None;
        }
        let seed: u64 = self.rng.r#gen();

        let event = match kind {
            TargetKind::Process => {
                // Hold the fleet lock from choice to kill.
                let mut fleet = fleet.lock().await;
                let candidates: Vec<String> = fleet.handles().into_iter().map(|h| h.id).collect();
                let target = choose_target(&candidates, seed)?;
                let result = if dry_run {
                    None
                } else {
                    Some(fleet.kill(&target).await.map_err(|e| e.to_string()))
                };
                self.record(kind, target, result)
            }
            TargetKind::Container => {
                let target = choose_target(&self.settings.containers, seed)?;
                let result = if dry_run {
                    None
                } else {
                    Some(self.services.kill(&target).await.map_err(|e| e.to_string()))
                };
                self.record(kind, target, result)
            }
        };

        if event.outcome == ChaosOutcome::Killed {
            self.kills += 1;
            self.live_kills.push_back(now);
            self.quiet_until.insert(kind, now + self.settings.recovery_time);
        }
        if let Err(e) = self.store.append_chaos_event(&event) {
            warn!(error = %e, "failed to persist chaos event");
        }
        Some(event)
    }

    /// `result` is `None` for a dry run.
    fn record(
        &mut self,
        kind: TargetKind,
        target: String,
        result: Option<Result<(), String>>,
    ) -> ChaosEvent {
        self.attempts += 1;
        let (outcome, error) = match result {
            None => (ChaosOutcome::DryRun, None),
            Some(Ok(())) => (ChaosOutcome::Killed, None),
            Some(Err(e)) => (ChaosOutcome::Failed, Some(e)),
        };
        match outcome {
            ChaosOutcome::Killed => warn!(%kind, %target, "chaos killed target"),
            ChaosOutcome::DryRun => info!(%kind, %target, "chaos would kill target (dry run)"),
            ChaosOutcome::Failed => {
                warn!(%kind, %target, error = error.as_deref().unwrap_or_default(), "chaos kill failed")
            }
        }
        ChaosEvent {
            timestamp: epoch_millis(),
            target,
            target_kind: kind,
            outcome,
            recovery_time_secs: self.settings.recovery_time.as_secs(),
            error,
        }
    }
}
