//! warden-core — shared types and configuration for the Warden control plane.
//!
//! Every other crate in the workspace depends on this one for the data
//! model (metrics snapshots, scaling decisions, instance handles, chaos
//! events, backup manifests, health status) and for the configuration file
//! format.

pub mod config;
pub mod duration;
pub mod types;

pub use config::{ConfigError, ConfigResult, WardenConfig};
pub use types::*;
