//! Scaling decision engine.

use std::time::Duration;

use tracing::debug;

use warden_core::config::ScalingConfig;
use warden_core::{MetricsSnapshot, ScaleAction, ScalingDecision};

/// When each direction last had an action applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CooldownState {
    /// Unix seconds of the last applied scale-up.
    last_scale_up: Option<u64>,
    /// Unix seconds of the last applied scale-down.
    last_scale_down: Option<u64>,
}

impl CooldownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an action was applied at `now`. `None` is ignored.
    pub fn record_applied(&mut self, action: ScaleAction, now: u64) {
        match action {
            ScaleAction::ScaleUp => self.last_scale_up = Some(now),
            ScaleAction::ScaleDown => self.last_scale_down = Some(now),
            ScaleAction::None => {}
        }
    }

    pub fn last_scale_up(&self) -> Option<u64> {
        self.last_scale_up
    }

    pub fn last_scale_down(&self) -> Option<u64> {
        self.last_scale_down
    }

    /// Time left before `action` may fire again, if any.
    fn remaining(&self, action: ScaleAction, config: &ScalingConfig, now: u64) -> Option<Duration> {
        let (last, window) = match action {
            ScaleAction::ScaleUp => (self.last_scale_up?, config.scale_up_cooldown),
            ScaleAction::ScaleDown => (self.last_scale_down?, config.scale_down_cooldown),
            ScaleAction::None => return None,
        };
        let elapsed = Duration::from_secs(now.saturating_sub(last));
        (elapsed < window).then(|| window - elapsed)
    }
}

/// Weighted load score in `0.0..=100.0`.
pub fn load_score(snapshot: &MetricsSnapshot, config: &ScalingConfig) -> f64 {
    let throughput_pct = if config.throughput_threshold > 0.0 {
        (snapshot.throughput_events_per_minute / config.throughput_threshold * 100.0).min(100.0)
    } else {
        0.0
    };
    let score = config.weight_cpu * snapshot.cpu_percent
        + config.weight_memory * snapshot.memory_percent
        + config.weight_throughput * throughput_pct;
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Compute the scaling decision for one tick.
///
/// `now` is Unix seconds. The returned target is always within
/// `[min_instances, max_instances]`.
pub fn decide(
    snapshot: &MetricsSnapshot,
    config: &ScalingConfig,
    cooldowns: &CooldownState,
    now: u64,
) -> ScalingDecision {
    let current = snapshot.current_instance_count;
    let (min, max) = (config.min_instances, config.max_instances);

    // Bounds repair ignores cooldowns.
    if current < min {
        return decision(ScaleAction::ScaleUp, current, min, "below minimum".into(), now);
    }
    if current > max {
        return decision(ScaleAction::ScaleDown, current, max, "above maximum".into(), now);
    }

    let load = load_score(snapshot, config);
    let pressure = pressure_reason(snapshot, config, load);

    let (action, target, reason) = if let Some(reason) = pressure {
        if current >= max {
            return ScalingDecision {
                computed_at: now,
                ..ScalingDecision::none(current, format!("{reason}; already at maximum"))
            };
        }
        let target = current.saturating_add(config.scale_up_step).min(max);
        (ScaleAction::ScaleUp, target, reason)
    } else if load < config.scale_down_threshold && current > min {
        let target = current.saturating_sub(config.scale_down_step).max(min);
        (
            ScaleAction::ScaleDown,
            target,
            format!(
                "load {load:.1} below scale_down_threshold {:.1}",
                config.scale_down_threshold
            ),
        )
    } else {
        return ScalingDecision {
            computed_at: now,
            ..ScalingDecision::none(current, format!("load {load:.1} within thresholds"))
        };
    };

    if let Some(left) = cooldowns.remaining(action, config, now) {
        debug!(?action, remaining_secs = left.as_secs(), "scaling suppressed by cooldown");
        return ScalingDecision {
            computed_at: now,
            ..ScalingDecision::none(
                current,
                format!("{reason}; cooldown active ({}s remaining)", left.as_secs()),
            )
        };
    }

    decision(action, current, config.clamp(target), reason, now)
}

fn pressure_reason(snapshot: &MetricsSnapshot, config: &ScalingConfig, load: f64) -> Option<String> {
    if load > config.scale_up_threshold {
        Some(format!(
            "load {load:.1} above scale_up_threshold {:.1}",
            config.scale_up_threshold
        ))
    } else if snapshot.cpu_percent >= config.cpu_threshold {
        Some(format!(
            "cpu {:.1}% at or above cpu_threshold {:.1}%",
            snapshot.cpu_percent, config.cpu_threshold
        ))
    } else if snapshot.memory_percent >= config.memory_threshold {
        Some(format!(
            "memory {:.1}% at or above memory_threshold {:.1}%",
            snapshot.memory_percent, config.memory_threshold
        ))
    } else {
        None
    }
}

fn decision(action: ScaleAction, current: u32, target: u32, reason: String, now: u64) -> ScalingDecision {
    debug!(?action, from = current, to = target, %reason, "scaling decision");
    ScalingDecision {
        action,
        current_instances: current,
        target_instances: target,
        reason,
        computed_at: now,
    }
}
