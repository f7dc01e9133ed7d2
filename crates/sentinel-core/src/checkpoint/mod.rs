//! Pre-mutation backups and undo.
//!
//! Each checkpoint owns a blob directory `<backup_dir>/<id>/` holding one
//! full copy per target plus an index in the database. Creation is
//! all-or-nothing: the index is written in a single transaction only after
//! every blob has been copied and hashed.

pub mod locks;
pub mod model;

pub use locks::{LockGuard, LockKey, LockTable};
pub use model::{
    BackupEntry, ChangeKind, Checkpoint, CheckpointState, FileStamp, RestoreReport, SweepReport,
};

use crate::error::{BackupFailure, Error, RestoreFailure, Result};
use crate::fsops::bounded;
use crate::hasher;
use crate::storage::{lock_db, SharedDb};
use crate::types::ActionKind;
use ahash::AHashSet;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct CheckpointManager {
    db: SharedDb,
    backup_root: PathBuf,
    retention: ChronoDuration,
    locks: Arc<LockTable>,
}

impl CheckpointManager {
    pub fn new(db: SharedDb, backup_root: PathBuf, retention_days: i64, locks: Arc<LockTable>) -> Self {
        Self {
            db,
            backup_root,
            retention: ChronoDuration::days(retention_days.max(0)),
            locks,
        }
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Back up `targets` under their path locks and persist the checkpoint.
    pub fn create_checkpoint(
        &self,
        kind: ActionKind,
        description: &str,
        targets: &[PathBuf],
        timeout: Duration,
    ) -> Result<Checkpoint> {
        let guard = self.locks.acquire(path_keys(targets), timeout)?;
        self.create_locked(&guard, kind, description, targets, timeout, Utc::now())
    }

    /// Same as [`create_checkpoint`](Self::create_checkpoint) for a caller
    /// already holding the path locks.
    pub fn create_locked(
        &self,
        guard: &LockGuard,
        kind: ActionKind,
        description: &str,
        targets: &[PathBuf],
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        let targets = unique(targets);
        if targets.is_empty() {
            return Err(Error::InvalidState("a checkpoint needs at least one target".to_string()));
        }
        if !guard.covers_paths(&targets) {
            return Err(Error::InvalidState("checkpoint targets are not locked".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let blob_dir = self.backup_root.join(&id);
        let start = Instant::now();

        let mut checkpoint = Checkpoint {
            id: id.clone(),
            created_at: now,
            kind,
            description: description.to_string(),
            state: CheckpointState::Pending,
            blob_dir: blob_dir.clone(),
            entries: Vec::with_capacity(targets.len()),
            total_bytes: 0,
        };

        let backed_up = fs::create_dir_all(&blob_dir)
            .map_err(|e| BackupFailure {
                path: blob_dir.clone(),
                reason: e.to_string(),
            })
            .and_then(|_| {
                for (seq, target) in targets.iter().enumerate() {
                    let entry = backup_one(target, &blob_dir, seq as i64, ChangeKind::for_action(kind), timeout)?;
                    checkpoint.total_bytes += entry.size;
                    checkpoint.entries.push(entry);
                }
                Ok(())
            });

        if let Err(failure) = backed_up {
            warn!("Checkpoint aborted, {}", failure);
            discard_blobs(&blob_dir);
            return Err(Error::Backup(failure));
        }

        checkpoint.state = CheckpointState::Committed;
        let rows: Vec<_> = checkpoint.entries.iter().map(BackupEntry::to_row).collect();
        if let Err(e) = lock_db(&self.db).insert_checkpoint(&checkpoint.to_row(), &rows) {
            discard_blobs(&blob_dir);
            return Err(e.into());
        }

        info!(
            "Checkpoint {} committed: {} files, {} bytes in {:.2}s",
            id,
            checkpoint.entries.len(),
            checkpoint.total_bytes,
            start.elapsed().as_secs_f64()
        );
        Ok(checkpoint)
    }

    pub fn get(&self, id: &str) -> Result<Checkpoint> {
        let db = lock_db(&self.db);
        let row = db
            .get_checkpoint(id)?
            .ok_or_else(|| Error::NotFound(format!("checkpoint {}", id)))?;
        let entries = db.get_checkpoint_entries(id)?;
        Checkpoint::from_rows(row, entries)
    }

    fn list(&self, states: &[CheckpointState], limit: usize) -> Result<Vec<Checkpoint>> {
        let states: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        let db = lock_db(&self.db);
        db.list_checkpoints(&states, limit as i64)?
            .into_iter()
            .map(|row| {
                let entries = db.get_checkpoint_entries(&row.id)?;
                Checkpoint::from_rows(row, entries)
            })
            .collect()
    }

    /// Newest first, any state.
    pub fn history(&self, limit: usize) -> Result<Vec<Checkpoint>> {
        self.list(&[], limit)
    }

    /// Committed checkpoints, newest first.
    pub fn undo_candidates(&self, limit: usize) -> Result<Vec<Checkpoint>> {
        self.list(&[CheckpointState::Committed], limit)
    }

    /// Record that the mutation for `path` completed, and where its output went.
    pub fn record_effect(&self, checkpoint: &Checkpoint, path: &Path, artifact: Option<&Path>) -> Result<()> {
        let entry = checkpoint
            .entry_for(path)
            .ok_or_else(|| Error::NotFound(format!("{} in checkpoint {}", path.display(), checkpoint.id)))?;
        let artifact = artifact
            .map(|p| {
                p.to_str()
                    .ok_or_else(|| Error::InvalidState(format!("output path {} is not valid UTF-8", p.display())))
            })
            .transpose()?;
        lock_db(&self.db).mark_entry_applied(&checkpoint.id, entry.seq, artifact)?;
        Ok(())
    }

    /// Restore every file of a committed checkpoint. Each entry is attempted
    /// even after a failure; the checkpoint becomes Reverted only when all
    /// entries are restored, otherwise it stays Committed for a retry.
    pub fn undo(&self, id: &str, timeout: Duration) -> Result<RestoreReport> {
        let preview = self.get(id)?;
        let mut keys = vec![LockKey::Checkpoint(id.to_string())];
        keys.extend(preview.entries.iter().map(|e| LockKey::Path(e.original_path.clone())));
        let _guard = self.locks.acquire(keys, timeout)?;

        // Re-read under the lock; a concurrent undo or sweep may have won.
        let checkpoint = self.get(id)?;
        if checkpoint.state != CheckpointState::Committed {
            return Err(Error::InvalidState(format!(
                "checkpoint {} is {}, only committed checkpoints can be undone",
                id, checkpoint.state
            )));
        }

        let mut report = RestoreReport {
            checkpoint_id: id.to_string(),
            restored: Vec::new(),
            already_restored: Vec::new(),
            failures: Vec::new(),
            state: CheckpointState::Committed,
        };

        for entry in &checkpoint.entries {
            if entry.restored {
                report.already_restored.push(entry.original_path.clone());
                continue;
            }
            let work = entry.clone();
            let outcome = bounded(timeout, &format!("restore of {}", entry.original_path.display()), move || {
                restore_entry(&work)
            })
            .and_then(|_| Ok(lock_db(&self.db).mark_entry_restored(id, entry.seq)?));

            match outcome {
                Ok(()) => {
                    debug!("Restored {}", entry.original_path.display());
                    report.restored.push(entry.original_path.clone());
                }
                Err(e) => {
                    warn!("Restore of {} failed: {}", entry.original_path.display(), e);
                    report.failures.push(RestoreFailure {
                        path: entry.original_path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if report.failures.is_empty() {
            lock_db(&self.db).set_checkpoint_state(id, CheckpointState::Reverted.as_str())?;
            discard_blobs(&checkpoint.blob_dir);
            report.state = CheckpointState::Reverted;
            info!("Checkpoint {} reverted ({} files)", id, report.restored.len());
        } else {
            warn!(
                "Checkpoint {} partially restored: {} ok, {} failed",
                id,
                report.restored.len(),
                report.failures.len()
            );
        }
        Ok(report)
    }

    /// Undo the most recent committed checkpoint.
    pub fn undo_last(&self, timeout: Duration) -> Result<RestoreReport> {
        let latest = self
            .undo_candidates(1)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound("no committed checkpoint to undo".to_string()))?;
        self.undo(&latest.id, timeout)
    }

    /// Expire committed checkpoints older than the retention window and
    /// release their blobs. A checkpoint whose lock is held (undo running)
    /// is skipped and picked up by a later sweep.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = (now - self.retention).timestamp_millis();
        let stale = lock_db(&self.db).checkpoints_older_than(CheckpointState::Committed.as_str(), cutoff)?;
        let mut report = SweepReport::default();

        for row in stale {
            let Some(_guard) = self.locks.try_acquire(vec![LockKey::Checkpoint(row.id.clone())]) else {
                debug!("Checkpoint {} is busy, skipping", row.id);
                report.skipped.push(row.id);
                continue;
            };

            // State may have changed between the listing and the lock.
            let still_committed = lock_db(&self.db)
                .get_checkpoint(&row.id)?
                .map_or(false, |r| r.state == CheckpointState::Committed.as_str());
            if !still_committed {
                continue;
            }

            lock_db(&self.db).set_checkpoint_state(&row.id, CheckpointState::Expired.as_str())?;
            let blob_dir = PathBuf::from(&row.blob_dir);
            if blob_dir.exists() {
                if let Err(e) = fs::remove_dir_all(&blob_dir) {
                    report.errors.push(format!("{}: {}", blob_dir.display(), e));
                }
            }
            report.released_bytes += row.total_bytes.max(0) as u64;
            report.expired.push(row.id);
        }

        if !report.expired.is_empty() || !report.skipped.is_empty() {
            info!(
                "Retention sweep: {} expired, {} skipped, {} bytes released",
                report.expired.len(),
                report.skipped.len(),
                report.released_bytes
            );
        }
        Ok(report)
    }
}

pub fn path_keys(paths: &[PathBuf]) -> Vec<LockKey> {
    paths.iter().map(|p| LockKey::Path(p.clone())).collect()
}

fn unique(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = AHashSet::with_capacity(paths.len());
    paths.iter().filter(|p| seen.insert(p.as_path())).cloned().collect()
}

fn discard_blobs(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Could not remove backup directory {}: {}", dir.display(), e);
        }
    }
}

fn backup_one(
    target: &Path,
    blob_dir: &Path,
    seq: i64,
    change: ChangeKind,
    timeout: Duration,
) -> std::result::Result<BackupEntry, BackupFailure> {
    let fail = |reason: String| BackupFailure {
        path: target.to_path_buf(),
        reason,
    };

    // The checkpoint index stores paths as text; a lossy name would restore elsewhere.
    if target.to_str().is_none() {
        return Err(fail("path is not valid UTF-8".to_string()));
    }
    let meta = fs::symlink_metadata(target).map_err(|e| fail(e.to_string()))?;
    if !meta.is_file() {
        return Err(fail("not a regular file".to_string()));
    }
    let stamp = FileStamp::capture(&meta).map_err(|e| fail(e.to_string()))?;

    let blob_path = blob_dir.join(format!("{}.blob", seq));
    let (src, dst) = (target.to_path_buf(), blob_path.clone());
    let (size, checksum) = bounded(timeout, &format!("backup of {}", target.display()), move || {
        hasher::copy_and_hash(&src, &dst)
    })
    .map_err(|e| fail(e.to_string()))?;

    Ok(BackupEntry {
        seq,
        original_path: target.to_path_buf(),
        change,
        blob_path,
        size,
        checksum,
        stamp,
        artifact: None,
        applied: false,
        restored: false,
    })
}

/// Put one file back: drop the mutation's artifact, copy the verified blob
/// next to the original, rename it into place, then restore metadata.
fn restore_entry(entry: &BackupEntry) -> io::Result<()> {
    let actual = hasher::hash_file(&entry.blob_path)?;
    if actual != entry.checksum {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("backup blob {} does not match its checksum", entry.blob_path.display()),
        ));
    }

    if entry.applied {
        if let Some(artifact) = entry.artifact.as_deref() {
            if artifact != entry.original_path && artifact.exists() {
                fs::remove_file(artifact)?;
            }
        }
    }

    let original = &entry.original_path;
    let parent = original
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "original path has no parent"))?;
    fs::create_dir_all(parent)?;

    let file_name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{}.sentinel-restore-{}", file_name, entry.seq));
    if staging.exists() {
        fs::remove_file(&staging)?;
    }
    hasher::copy_and_hash(&entry.blob_path, &staging)?;
    fs::rename(&staging, original)?;
    entry.stamp.apply(original)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{shared, Database};
    use tempfile::tempdir;

    fn manager(root: &Path) -> CheckpointManager {
        CheckpointManager::new(
            shared(Database::open_in_memory().unwrap()),
            root.join("backups"),
            30,
            LockTable::new(),
        )
    }

    #[test]
    fn test_missing_target_aborts_without_residue() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let good = dir.path().join("good.txt");
        fs::write(&good, b"data").unwrap();

        let err = mgr
            .create_checkpoint(
                ActionKind::Cleanup,
                "t",
                &[good.clone(), dir.path().join("missing.txt")],
                Duration::from_secs(5),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Backup(_)));
        assert!(mgr.history(10).unwrap().is_empty());
        let leftovers = fs::read_dir(mgr.backup_root()).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_undo_twice_is_rejected() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let file = dir.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();

        let cp = mgr
            .create_checkpoint(ActionKind::Cleanup, "t", &[file.clone()], Duration::from_secs(5))
            .unwrap();
        fs::remove_file(&file).unwrap();

        let report = mgr.undo(&cp.id, Duration::from_secs(5)).unwrap();
        assert!(report.is_complete());
        assert_eq!(fs::read(&file).unwrap(), b"hello");
        assert!(matches!(mgr.undo(&cp.id, Duration::from_secs(5)), Err(Error::InvalidState(_))));
    }
}
