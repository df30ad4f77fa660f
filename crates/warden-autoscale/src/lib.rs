//! warden-autoscale — the scaling decision engine.
//!
//! Turns one `MetricsSnapshot` into one `ScalingDecision`. The engine is a
//! pure function of the snapshot, the scaling config, the cooldown state and
//! the current time; it never touches the fleet itself.
//!
//! # Scaling Algorithm
//!
//! ```text
//! L = w_cpu·cpu% + w_mem·mem% + w_tp·min(100, throughput / throughput_threshold · 100)
//!
//! current < min                        → ScaleUp to min      (no cooldown)
//! current > max                        → ScaleDown to max    (no cooldown)
//! L > up, cpu ≥ cpu_thr, mem ≥ mem_thr → ScaleUp by scale_up_step
//! L < down and current > min           → ScaleDown by scale_down_step
//! otherwise                            → None
//! ```
//!
//! Up and down cooldowns are tracked separately and only advance when the
//! lifecycle manager reports an applied action.

pub mod scaler;

pub use scaler::{CooldownState, decide, load_score};
