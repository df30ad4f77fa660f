//! The `restore.pending` journal.
//!
//! Written before a restore touches anything and removed only after the
//! last step succeeds. It survives a crash of the control plane, so a
//! half-finished restore stays visible across restarts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RecoveryError, RecoveryResult};

pub const JOURNAL_FILE: &str = "restore.pending";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub backup_id: String,
    /// Unix timestamp (milliseconds).
    pub started_at: u64,
    /// Last step started.
    pub step: String,
}

#[derive(Debug, Clone)]
pub struct RestoreJournal {
    path: PathBuf,
}

impl RestoreJournal {
    pub fn new(journal_dir: &Path) -> Self {
        Self {
            path: journal_dir.join(JOURNAL_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_pending(&self) -> bool {
        self.path.exists()
    }

    /// The pending entry, if the journal exists and parses.
    pub fn read(&self) -> Option<JournalEntry> {
        let bytes = fs::read(&self.path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn write(&self, entry: &JournalEntry) -> RecoveryResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(RecoveryError::io(parent))?;
        }
        let json =
            serde_json::to_vec_pretty(entry).map_err(|e| RecoveryError::Serialize(e.to_string()))?;
        let tmp = self.path.with_extension("pending.tmp");
        fs::write(&tmp, json).map_err(RecoveryError::io(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(RecoveryError::io(&self.path))
    }

    pub fn clear(&self) -> RecoveryResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RecoveryError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}
