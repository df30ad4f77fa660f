//! warden-metrics — per-tick load snapshots for the scaling engine.
//!
//! A [`MetricsSource`] produces one [`MetricsSnapshot`](warden_core::MetricsSnapshot)
//! per tick. The production source reads host CPU and memory through
//! `sysinfo` and sums worker-reported throughput from each worker's stats
//! endpoint. Collection never fails as a whole: any sub-metric that cannot
//! be read is reported as zero.

pub mod collector;

pub use collector::{FixedMetricsSource, MetricsSource, SystemMetricsCollector, WorkerStats};
