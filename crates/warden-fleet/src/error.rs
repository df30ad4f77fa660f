use std::time::Duration;

use thiserror::Error;

use warden_core::BackendKind;

/// Errors from worker and service lifecycle operations.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("failed to start {unit}: {reason}")]
    StartFailed { unit: String, reason: String },

    #[error("failed to stop {unit}: {reason}")]
    StopFailed { unit: String, reason: String },

    #[error("{op} of {unit} timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        unit: String,
        timeout: Duration,
    },

    #[error("no launcher registered for backend {0:?}")]
    NoLauncher(BackendKind),

    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("fleet below minimum: {reached} of {required} instances live")]
    BelowMinimum { reached: u32, required: u32 },

    #[error("service control failed for {service}: {reason}")]
    Service { service: String, reason: String },
}

pub type FleetResult<T> = Result<T, FleetError>;
