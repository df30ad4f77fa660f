//! On-disk backup directory: one subdirectory per backup.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use warden_core::BackupManifest;

use crate::error::{RecoveryError, RecoveryResult};

pub const MANIFEST_FILE: &str = "manifest.json";
const BACKUP_PREFIX: &str = "backup-";

#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_path(&self, backup_id: &str) -> PathBuf {
        self.root.join(backup_id)
    }

    /// Create a fresh `backup-<millis>` directory. Bumps the stamp on collision.
    pub fn create(&self, now_millis: u64) -> RecoveryResult<(String, PathBuf)> {
        fs::create_dir_all(&self.root).map_err(RecoveryError::io(&self.root))?;
        let mut stamp = now_millis;
        loop {
            let id = format!("{BACKUP_PREFIX}{stamp}");
            let path = self.root.join(&id);
            match fs::create_dir(&path) {
                Ok(()) => return Ok((id, path)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => stamp += 1,
                Err(e) => return Err(RecoveryError::Io { path, source: e }),
            }
        }
    }

    /// Mark a backup complete by writing its manifest (temp file + rename).
    pub fn commit(&self, manifest: &BackupManifest) -> RecoveryResult<()> {
        let dir = self.backup_path(&manifest.backup_id);
        let json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| RecoveryError::Serialize(e.to_string()))?;
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        let path = dir.join(MANIFEST_FILE);
        fs::write(&tmp, json).map_err(RecoveryError::io(&tmp))?;
        fs::rename(&tmp, &path).map_err(RecoveryError::io(&path))?;
        debug!(backup_id = %manifest.backup_id, "manifest committed");
        Ok(())
    }

    /// Every complete backup, oldest first.
    pub fn list_complete(&self) -> RecoveryResult<Vec<BackupManifest>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RecoveryError::Io {
                    path: self.root.clone(),
                    source: e,
                });
            }
        };

        let mut manifests = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(BACKUP_PREFIX) || !entry.path().is_dir() {
                continue;
            }
            match read_manifest(&entry.path()) {
                Some(manifest) => manifests.push(manifest),
                None => debug!(backup = %name, "skipping incomplete backup"),
            }
        }
        manifests.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.backup_id.cmp(&b.backup_id))
        });
        Ok(manifests)
    }

    pub fn latest_complete(&self) -> RecoveryResult<Option<BackupManifest>> {
        Ok(self.list_complete()?.pop())
    }

    /// Load a backup by id. Incomplete backups are refused.
    pub fn get(&self, backup_id: &str) -> RecoveryResult<BackupManifest> {
        check_id(backup_id)?;
        let dir = self.backup_path(backup_id);
        if !dir.is_dir() {
            return Err(RecoveryError::NotFound(backup_id.to_string()));
        }
        read_manifest(&dir).ok_or_else(|| RecoveryError::Incomplete(backup_id.to_string()))
    }

    /// Delete the oldest complete backups so that at most `retain` remain.
    pub fn prune(&self, retain: usize) -> RecoveryResult<Vec<String>> {
        let complete = self.list_complete()?;
        let excess = complete.len().saturating_sub(retain);
        let mut removed = Vec::new();
        for manifest in complete.into_iter().take(excess) {
            let dir = self.backup_path(&manifest.backup_id);
            match fs::remove_dir_all(&dir) {
                Ok(()) => removed.push(manifest.backup_id),
                Err(e) => warn!(path = %dir.display(), error = %e, "failed to prune backup"),
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), retain, "old backups pruned");
        }
        Ok(removed)
    }
}

/// Ids name a single directory directly under the store root.
fn check_id(backup_id: &str) -> RecoveryResult<()> {
    let plain = !backup_id.is_empty()
        && backup_id != "."
        && backup_id != ".."
        && !backup_id.contains(['/', '\\'])
        && Path::new(backup_id).components().count() == 1;
    if plain {
        Ok(())
    } else {
        Err(RecoveryError::InvalidId(backup_id.to_string()))
    }
}

fn read_manifest(dir: &Path) -> Option<BackupManifest> {
    let bytes = fs::read(dir.join(MANIFEST_FILE)).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "unreadable backup manifest");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, created_at: u64) -> BackupManifest {
        BackupManifest {
            backup_id: id.to_string(),
            created_at,
            component_list: vec![],
            source_version: "0.1.0".to_string(),
        }
    }

    #[test]
    fn create_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let (a, _) = store.create(1000).unwrap();
        let (b, _) = store.create(1000).unwrap();
        assert_eq!(a, "backup-1000");
        assert_eq!(b, "backup-1001");
    }

    #[test]
    fn manifestless_backup_is_never_offered() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());

        let (complete, _) = store.create(1000).unwrap();
        store.commit(&manifest(&complete, 1000)).unwrap();

        // Newer, but never committed.
        let (partial, path) = store.create(2000).unwrap();
        fs::write(path.join("payload"), "half").unwrap();

        let listed = store.list_complete().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(store.latest_complete().unwrap().unwrap().backup_id, complete);
        assert!(matches!(store.get(&partial), Err(RecoveryError::Incomplete(_))));
        assert!(matches!(store.get("backup-9"), Err(RecoveryError::NotFound(_))));
    }

    #[test]
    fn ids_outside_the_root_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("backups");
        let store = BackupStore::new(&root);

        // A committed backup next to the store root must stay unreachable.
        let outside = BackupStore::new(dir.path());
        let (id, _) = outside.create(1000).unwrap();
        outside.commit(&manifest(&id, 1000)).unwrap();

        for bad in [
            format!("../{id}"),
            "..".to_string(),
            "".to_string(),
            "/etc".to_string(),
            "a\\b".to_string(),
        ] {
            assert!(
                matches!(store.get(&bad), Err(RecoveryError::InvalidId(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn empty_or_missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("absent"));
        assert!(store.list_complete().unwrap().is_empty());
        assert!(store.latest_complete().unwrap().is_none());
    }

    #[test]
    fn prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        for t in [1000, 2000, 3000, 4000] {
            let (id, _) = store.create(t).unwrap();
            store.commit(&manifest(&id, t)).unwrap();
        }

        let removed = store.prune(2).unwrap();
        assert_eq!(removed, vec!["backup-1000", "backup-2000"]);
        let left: Vec<String> = store
            .list_complete()
            .unwrap()
            .into_iter()
            .map(|m| m.backup_id)
            .collect();
        assert_eq!(left, vec!["backup-3000", "backup-4000"]);
    }
}
