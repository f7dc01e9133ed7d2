use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid rule: {0}")]
    Validation(#[from] ValidationError),

    #[error("Checkpoint creation failed: {0}")]
    Backup(#[from] BackupFailure),

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timed out waiting for lock on {0}")]
    Locked(String),

    #[error("{0}")]
    Other(String),
}

/// A malformed rule definition. Raised at load/create time; the offending
/// rule is excluded and every other rule still evaluates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("rule '{rule}': {reason}")]
pub struct ValidationError {
    pub rule: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

/// An unreadable file or bad metadata entry. The file is left out of the
/// analysis; the scan itself continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanError {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// Checkpoint creation aborted. No partial checkpoint was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("backup of {} failed: {reason}", path.display())]
pub struct BackupFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// One file that could not be restored during undo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// One file whose mutation failed during commit. For a timeout the mutation
/// may still complete afterwards; it is then recorded on the checkpoint and
/// undo treats it like any other applied change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionFailure {
    pub path: PathBuf,
    pub reason: String,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
