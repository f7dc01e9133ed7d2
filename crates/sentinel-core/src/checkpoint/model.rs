use crate::error::{Error, RestoreFailure};
use crate::storage::models::{CheckpointEntryRow, CheckpointRow};
use crate::types::ActionKind;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::fs::{self, File, FileTimes, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// `Pending → Committed → (Reverted | Expired)`. Pending only exists while
/// backups are being taken; a checkpoint is persisted once it is Committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    Pending,
    Committed,
    Reverted,
    Expired,
}

impl CheckpointState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointState::Pending => "pending",
            CheckpointState::Committed => "committed",
            CheckpointState::Reverted => "reverted",
            CheckpointState::Expired => "expired",
        }
    }

    pub fn can_become(&self, next: CheckpointState) -> bool {
        matches!(
            (self, next),
            (CheckpointState::Pending, CheckpointState::Committed)
                | (CheckpointState::Committed, CheckpointState::Reverted)
                | (CheckpointState::Committed, CheckpointState::Expired)
        )
    }
}

impl fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CheckpointState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CheckpointState::Pending),
            "committed" => Ok(CheckpointState::Committed),
            "reverted" => Ok(CheckpointState::Reverted),
            "expired" => Ok(CheckpointState::Expired),
            other => Err(Error::InvalidState(format!("unknown checkpoint state '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Modify,
    Move,
    Delete,
}

impl ChangeKind {
    pub fn for_action(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Cleanup => ChangeKind::Delete,
            ActionKind::Organize | ActionKind::Archive => ChangeKind::Move,
            ActionKind::Compress | ActionKind::Review => ChangeKind::Modify,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Modify => "modify",
            ChangeKind::Move => "move",
            ChangeKind::Delete => "delete",
        }
    }
}

impl FromStr for ChangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "modify" => Ok(ChangeKind::Modify),
            "move" => Ok(ChangeKind::Move),
            "delete" => Ok(ChangeKind::Delete),
            other => Err(Error::InvalidState(format!("unknown change kind '{}'", other))),
        }
    }
}

fn to_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}

fn from_nanos(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}

/// Timestamps and permissions needed to put a file back exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileStamp {
    pub modified_ns: i64,
    pub accessed_ns: i64,
    /// Unix permission bits, when the platform has them.
    pub mode: Option<u32>,
    pub readonly: bool,
}

impl FileStamp {
    pub fn capture(meta: &Metadata) -> io::Result<Self> {
        let modified = meta.modified()?;
        let accessed = meta.accessed().unwrap_or(modified);

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(meta.permissions().mode())
        };
        #[cfg(not(unix))]
        let mode = None;

        Ok(Self {
            modified_ns: to_nanos(modified),
            accessed_ns: to_nanos(accessed),
            mode,
            readonly: meta.permissions().readonly(),
        })
    }

    pub fn modified(&self) -> SystemTime {
        from_nanos(self.modified_ns)
    }

    /// Times first, then permissions: a read-only mode would otherwise block
    /// the handle needed to set the times.
    pub fn apply(&self, path: &Path) -> io::Result<()> {
        let file = File::options().write(true).open(path)?;
        file.set_times(
            FileTimes::new()
                .set_modified(from_nanos(self.modified_ns))
                .set_accessed(from_nanos(self.accessed_ns)),
        )?;
        drop(file);

        #[cfg(unix)]
        {
            if let Some(mode) = self.mode {
                use std::os::unix::fs::PermissionsExt;
                return fs::set_permissions(path, fs::Permissions::from_mode(mode));
            }
        }

        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(self.readonly);
        fs::set_permissions(path, perms)
    }
}

/// One backed-up file inside a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupEntry {
    pub seq: i64,
    pub original_path: PathBuf,
    pub change: ChangeKind,
    pub blob_path: PathBuf,
    pub size: u64,
    pub checksum: u64,
    pub stamp: FileStamp,
    /// Where the mutation left its output (moved file, compressed file).
    pub artifact: Option<PathBuf>,
    /// Whether the mutation for this file completed.
    pub applied: bool,
    pub restored: bool,
}

impl BackupEntry {
    fn from_row(row: CheckpointEntryRow) -> Result<Self, Error> {
        Ok(Self {
            seq: row.seq,
            original_path: PathBuf::from(row.original_path),
            change: row.change_kind.parse()?,
            blob_path: PathBuf::from(row.blob_path),
            size: row.size.max(0) as u64,
            checksum: row.checksum as u64,
            stamp: FileStamp {
                modified_ns: row.modified_ns,
                accessed_ns: row.accessed_ns,
                mode: row.mode.map(|m| m as u32),
                readonly: row.readonly,
            },
            artifact: row.artifact_path.map(PathBuf::from),
            applied: row.applied,
            restored: row.restored,
        })
    }

    pub(crate) fn to_row(&self) -> CheckpointEntryRow {
        CheckpointEntryRow {
            seq: self.seq,
            original_path: self.original_path.to_string_lossy().into_owned(),
            change_kind: self.change.as_str().to_string(),
            blob_path: self.blob_path.to_string_lossy().into_owned(),
            size: self.size as i64,
            checksum: self.checksum as i64,
            modified_ns: self.stamp.modified_ns,
            accessed_ns: self.stamp.accessed_ns,
            mode: self.stamp.mode.map(i64::from),
            readonly: self.stamp.readonly,
            artifact_path: self.artifact.as_ref().map(|p| p.to_string_lossy().into_owned()),
            applied: self.applied,
            restored: self.restored,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkpoint {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub kind: ActionKind,
    pub description: String,
    pub state: CheckpointState,
    pub blob_dir: PathBuf,
    pub entries: Vec<BackupEntry>,
    pub total_bytes: u64,
}

impl Checkpoint {
    pub(crate) fn from_rows(row: CheckpointRow, entries: Vec<CheckpointEntryRow>) -> Result<Self, Error> {
        Ok(Self {
            created_at: Utc
                .timestamp_millis_opt(row.created_at)
                .single()
                .unwrap_or_default(),
            kind: row.action_kind.parse().map_err(Error::InvalidState)?,
            state: row.state.parse()?,
            blob_dir: PathBuf::from(row.blob_dir),
            total_bytes: row.total_bytes.max(0) as u64,
            entries: entries
                .into_iter()
                .map(BackupEntry::from_row)
                .collect::<Result<_, _>>()?,
            id: row.id,
            description: row.description,
        })
    }

    pub(crate) fn to_row(&self) -> CheckpointRow {
        CheckpointRow {
            id: self.id.clone(),
            created_at: self.created_at.timestamp_millis(),
            action_kind: self.kind.as_str().to_string(),
            description: self.description.clone(),
            state: self.state.as_str().to_string(),
            total_bytes: self.total_bytes as i64,
            blob_dir: self.blob_dir.to_string_lossy().into_owned(),
        }
    }

    pub fn entry_for(&self, path: &Path) -> Option<&BackupEntry> {
        self.entries.iter().find(|e| e.original_path == path)
    }

    /// Whether every path in `paths` is backed up here.
    pub fn covers<P: AsRef<Path>>(&self, paths: &[P]) -> bool {
        paths.iter().all(|p| self.entry_for(p.as_ref()).is_some())
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }
}

/// Per-file result of an undo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreReport {
    pub checkpoint_id: String,
    pub restored: Vec<PathBuf>,
    /// Entries already restored by an earlier attempt.
    pub already_restored: Vec<PathBuf>,
    pub failures: Vec<RestoreFailure>,
    pub state: CheckpointState,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub expired: Vec<String>,
    /// Busy checkpoints (undo in progress), left for the next sweep.
    pub skipped: Vec<String>,
    pub released_bytes: u64,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_state_transitions() {
        use CheckpointState::*;
        assert!(Pending.can_become(Committed));
        assert!(Committed.can_become(Reverted));
        assert!(Committed.can_become(Expired));
        assert!(!Reverted.can_become(Committed));
        assert!(!Expired.can_become(Reverted));
        assert_eq!("expired".parse::<CheckpointState>().unwrap(), Expired);
    }

    #[test]
    fn test_nanos_round_trip_before_epoch() {
        let before = UNIX_EPOCH - Duration::from_secs(90);
        assert_eq!(from_nanos(to_nanos(before)), before);
    }

    #[test]
    fn test_stamp_apply_restores_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, b"x").unwrap();
        let stamp = FileStamp {
            modified_ns: 1_600_000_000_000_000_000,
            accessed_ns: 1_600_000_000_000_000_000,
            mode: None,
            readonly: false,
        };
        stamp.apply(&path).unwrap();
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(FileStamp::capture(&meta).unwrap().modified_ns, stamp.modified_ns);
    }
}
