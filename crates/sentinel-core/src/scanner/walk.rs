use crate::error::ScanError;
use crate::progress::ProgressReporter;
use crate::types::{FolderSnapshot, RawFileMeta};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{error, warn};

/// Snapshots of every folder under the roots, plus the entries that could
/// not be read.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub snapshots: Vec<FolderSnapshot>,
    pub errors: Vec<ScanError>,
}

impl WalkOutcome {
    pub fn file_count(&self) -> usize {
        self.snapshots.iter().map(|s| s.files.len()).sum()
    }
}

struct Walk<'a> {
    folders: DashMap<PathBuf, Vec<RawFileMeta>>,
    errors: Mutex<Vec<ScanError>>,
    ignore_patterns: Vec<Pattern>,
    found: AtomicUsize,
    reporter: &'a dyn ProgressReporter,
}

/// Parallel directory traversal. Groups regular files by parent folder,
/// skipping symlinks and anything matched by the glob ignore patterns.
/// Unreadable entries are recorded as [`ScanError`]s and the walk goes on.
pub fn build_snapshots(
    root_paths: &[&str],
    ignore_globs: &[&str],
    taken_at: DateTime<Utc>,
    reporter: &dyn ProgressReporter,
) -> WalkOutcome {
    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let walk = Walk {
        folders: DashMap::new(),
        errors: Mutex::new(Vec::new()),
        ignore_patterns,
        found: AtomicUsize::new(0),
        reporter,
    };

    root_paths
        .par_iter()
        .for_each(|root_dir| walk.visit_dir(Path::new(root_dir)));

    let mut snapshots: Vec<FolderSnapshot> = walk
        .folders
        .into_iter()
        .map(|(folder, mut files)| {
            files.sort_by(|a, b| a.path.cmp(&b.path));
            FolderSnapshot {
                folder,
                files,
                taken_at,
            }
        })
        .collect();
    snapshots.sort_by(|a, b| a.folder.cmp(&b.folder));

    let mut errors = walk
        .errors
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    errors.sort_by(|a, b| a.path.cmp(&b.path));

    WalkOutcome { snapshots, errors }
}

impl Walk<'_> {
    fn ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    fn record_error(&self, path: &Path, err: &io::Error) {
        warn!("Skipping {}: {}", path.display(), err);
        self.errors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(ScanError {
                path: path.to_path_buf(),
                reason: err.to_string(),
            });
    }

    fn visit_dir(&self, dir: &Path) {
        if !dir.is_dir() || self.ignored(dir) {
            return;
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() == io::ErrorKind::PermissionDenied {
                    error!("Access denied reading directory {}: {}", dir.display(), err);
                }
                self.record_error(dir, &err);
                return;
            }
        };

        entries.par_bridge().for_each(|entry_result| {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    self.record_error(dir, &err);
                    return;
                }
            };

            let path = entry.path();
            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(err) => {
                    self.record_error(&path, &err);
                    return;
                }
            };

            if metadata.file_type().is_symlink() || self.ignored(&path) {
                return;
            }
            if metadata.is_dir() {
                self.visit_dir(&path);
                return;
            }
            if !metadata.is_file() {
                return;
            }

            let modified = match metadata.modified() {
                Ok(time) => DateTime::<Utc>::from(time),
                Err(err) => {
                    self.record_error(&path, &err);
                    return;
                }
            };

            let found = self.found.fetch_add(1, Ordering::Relaxed) + 1;
            if found % 1000 == 0 {
                self.reporter
                    .on_scan_progress(found, &path.to_string_lossy());
            }
            self.folders
                .entry(dir.to_path_buf())
                .or_default()
                .push(RawFileMeta::new(path, metadata.len(), modified));
        });
    }
}
