//! Backup components: what gets captured, verified and put back.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use warden_core::{ComponentEntry, ComponentKind};
use warden_state::{StateSnapshot, StateStore};

use crate::error::{RecoveryError, RecoveryResult};

const STATE_FILE: &str = "state.json";
const SOURCES_FILE: &str = "sources.json";

/// One declared unit of backup.
#[derive(Clone)]
pub enum BackupComponent {
    /// Full export of the embedded state store.
    StateStore(StateStore),
    /// Configuration files or directories.
    Configuration(Vec<PathBuf>),
    /// Built artifact directories.
    Artifacts(Vec<PathBuf>),
}

impl std::fmt::Debug for BackupComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateStore(_) => f.write_str("StateStore"),
            Self::Configuration(paths) => f.debug_tuple("Configuration").field(paths).finish(),
            Self::Artifacts(paths) => f.debug_tuple("Artifacts").field(paths).finish(),
        }
    }
}

impl BackupComponent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateStore(_) => "state",
            Self::Configuration(_) => "config",
            Self::Artifacts(_) => "artifacts",
        }
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::StateStore(_) => ComponentKind::StateStore,
            Self::Configuration(_) => ComponentKind::Configuration,
            Self::Artifacts(_) => ComponentKind::Artifacts,
        }
    }

    /// Write this component's payload under `backup_dir` and describe it.
    pub fn capture(&self, backup_dir: &Path) -> RecoveryResult<ComponentEntry> {
        let dir = backup_dir.join(self.name());
        fs::create_dir_all(&dir).map_err(RecoveryError::io(&dir))?;

        match self {
            Self::StateStore(store) => {
                let snapshot = store.export()?;
                let json = serde_json::to_vec_pretty(&snapshot)
                    .map_err(|e| RecoveryError::Serialize(e.to_string()))?;
                let path = dir.join(STATE_FILE);
                fs::write(&path, json).map_err(RecoveryError::io(&path))?;
            }
            Self::Configuration(paths) | Self::Artifacts(paths) => {
                capture_paths(paths, &dir)?;
            }
        }

        let (files, bytes, sha256) = digest_dir(&dir)?;
        debug!(component = self.name(), files, bytes, "component captured");
        Ok(ComponentEntry {
            name: self.name().to_string(),
            kind: self.kind(),
            files,
            bytes,
            sha256,
        })
    }

    /// Put this component back from `backup_dir`.
    pub fn restore(&self, backup_dir: &Path) -> RecoveryResult<()> {
        let dir = backup_dir.join(self.name());
        match self {
            Self::StateStore(store) => {
                let path = dir.join(STATE_FILE);
                let bytes = fs::read(&path).map_err(RecoveryError::io(&path))?;
                let snapshot: StateSnapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| RecoveryError::Serialize(e.to_string()))?;
                store.import(&snapshot)?;
            }
            Self::Configuration(_) | Self::Artifacts(_) => restore_paths(&dir)?,
        }
        debug!(component = self.name(), "component restored");
        Ok(())
    }
}

/// Recompute the checksum of a captured component and compare.
pub fn verify(entry: &ComponentEntry, backup_dir: &Path) -> RecoveryResult<()> {
    let dir = backup_dir.join(&entry.name);
    let (_, _, actual) = digest_dir(&dir)?;
    if actual != entry.sha256 {
        return Err(RecoveryError::Checksum {
            component: entry.name.clone(),
            expected: entry.sha256.clone(),
            actual,
        });
    }
    Ok(())
}

fn capture_paths(paths: &[PathBuf], dir: &Path) -> RecoveryResult<()> {
    let mut sources = Vec::with_capacity(paths.len());
    for (index, src) in paths.iter().enumerate() {
        let src = fs::canonicalize(src).map_err(RecoveryError::io(src))?;
        let file_name = src
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "root".into());
        copy_path(&src, &dir.join(index.to_string()).join(file_name))?;
        sources.push(src);
    }
    let path = dir.join(SOURCES_FILE);
    let json =
        serde_json::to_vec_pretty(&sources).map_err(|e| RecoveryError::Serialize(e.to_string()))?;
    fs::write(&path, json).map_err(RecoveryError::io(&path))
}

fn restore_paths(dir: &Path) -> RecoveryResult<()> {
    let path = dir.join(SOURCES_FILE);
    let bytes = fs::read(&path).map_err(RecoveryError::io(&path))?;
    let sources: Vec<PathBuf> =
        serde_json::from_slice(&bytes).map_err(|e| RecoveryError::Serialize(e.to_string()))?;

    for (index, target) in sources.iter().enumerate() {
        let file_name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "root".into());
        let saved = dir.join(index.to_string()).join(file_name);
        if saved.is_dir() && target.exists() {
            // Directories are replaced wholesale so stale files disappear.
            fs::remove_dir_all(target).map_err(RecoveryError::io(target))?;
        }
        copy_path(&saved, target)?;
    }
    Ok(())
}

/// Copy a file, or a directory tree, to `dst`.
fn copy_path(src: &Path, dst: &Path) -> RecoveryResult<()> {
    if src.is_dir() {
        for entry in WalkDir::new(src) {
            let entry = entry.map_err(|e| RecoveryError::Io {
                path: src.to_path_buf(),
                source: e.into(),
            })?;
            let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
            let target = dst.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(RecoveryError::io(&target))?;
            } else {
                fs::copy(entry.path(), &target).map_err(RecoveryError::io(entry.path()))?;
            }
        }
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(RecoveryError::io(parent))?;
        }
        fs::copy(src, dst).map_err(RecoveryError::io(src))?;
    }
    Ok(())
}

/// Walk a directory in name order; returns (files, bytes, hex sha256).
/// Relative paths are hashed along with contents.
pub fn digest_dir(dir: &Path) -> RecoveryResult<(u64, u64, String)> {
    let mut hasher = Sha256::new();
    let mut files = 0u64;
    let mut bytes = 0u64;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| RecoveryError::Io {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let content = fs::read(entry.path()).map_err(RecoveryError::io(entry.path()))?;
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(&content);
        files += 1;
        bytes += content.len() as u64;
    }
    Ok((files, bytes, hex::encode(hasher.finalize())))
}
