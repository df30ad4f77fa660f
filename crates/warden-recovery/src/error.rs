use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during backup or restore.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("state store error: {0}")]
    State(#[from] warden_state::StateError),

    #[error("fleet error: {0}")]
    Fleet(#[from] warden_fleet::FleetError),

    #[error("backup not found: {0}")]
    NotFound(String),

    #[error("backup {0} is incomplete (no manifest)")]
    Incomplete(String),

    #[error("no complete backup available")]
    NoBackup,

    #[error("invalid backup id {0:?}")]
    InvalidId(String),

    /// Backups are refused while an interrupted restore is outstanding.
    #[error("restore of {0} is still pending; backup refused")]
    RestorePending(String),

    #[error("checksum mismatch for component {component}: expected {expected}, got {actual}")]
    Checksum {
        component: String,
        expected: String,
        actual: String,
    },

    #[error("{step} timed out after {timeout:?}")]
    Timeout { step: String, timeout: Duration },

    #[error("background task failed: {0}")]
    Task(String),

    /// A restore step failed; the fleet is left in a critical state.
    #[error("restore failed at step '{step}': {reason}")]
    Critical { step: String, reason: String },
}

impl RecoveryError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;
