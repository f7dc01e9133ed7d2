//! Carries out an approved recommendation.
//!
//! A dry run only plans. A commit takes the path locks, backs every target
//! up into a committed checkpoint, then mutates file by file. Per-file
//! failures are collected and never roll back files that already changed;
//! the checkpoint is the way back.

use crate::analysis::extractor;
use crate::checkpoint::{path_keys, Checkpoint, CheckpointManager};
use crate::error::{Error, ExecutionFailure, Result};
use crate::fsops::{bounded_or_late, FileOps};
use crate::learning::{LearningStore, Outcome};
use crate::progress::ProgressReporter;
use crate::types::{ActionKind, Recommendation};
use ahash::AHashSet;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Set to `true` to cancel an execution that has not started mutating yet.
pub type CancelToken = Arc<AtomicBool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    DryRun,
    Commit,
}

/// One planned or performed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    Delete { path: PathBuf },
    Move { from: PathBuf, to: PathBuf },
    Compress { from: PathBuf, to: PathBuf },
    Review { path: PathBuf },
}

impl Effect {
    pub fn source(&self) -> &Path {
        match self {
            Effect::Delete { path } | Effect::Review { path } => path,
            Effect::Move { from, .. } | Effect::Compress { from, .. } => from,
        }
    }

    /// Where the effect leaves its output, if anywhere.
    pub fn artifact(&self) -> Option<&Path> {
        match self {
            Effect::Move { to, .. } | Effect::Compress { to, .. } => Some(to),
            Effect::Delete { .. } | Effect::Review { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub kind: ActionKind,
    pub effects: Vec<Effect>,
}

/// `name.ext` → `name_N.ext`.
fn numbered(path: &Path, n: usize) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let mut name = OsString::from(format!("{}_{}", stem, n));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

/// First free name for `wanted`, considering both the disk and names
/// already taken by this plan.
fn free_name(wanted: PathBuf, taken: &mut AHashSet<PathBuf>) -> PathBuf {
    let mut candidate = wanted.clone();
    let mut n = 1;
    while taken.contains(&candidate) || candidate.exists() {
        candidate = numbered(&wanted, n);
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

fn file_name(path: &Path) -> OsString {
    path.file_name().map(OsString::from).unwrap_or_default()
}

/// Resolve the concrete effects of a recommendation. Reads the filesystem
/// to avoid name collisions but never changes it.
pub fn plan(recommendation: &Recommendation) -> ExecutionPlan {
    let kind = recommendation.kind();
    let mut taken = AHashSet::new();

    let effects = recommendation
        .targets()
        .iter()
        .map(|path| {
            let parent = path.parent().unwrap_or_else(|| Path::new(""));
            match kind {
                ActionKind::Cleanup => Effect::Delete { path: path.clone() },
                ActionKind::Review => Effect::Review { path: path.clone() },
                ActionKind::Archive => {
                    let dir = recommendation
                        .destination()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| parent.join("Archive"));
                    Effect::Move {
                        from: path.clone(),
                        to: free_name(dir.join(file_name(path)), &mut taken),
                    }
                }
                ActionKind::Organize => {
                    let dir = recommendation.destination().map(Path::to_path_buf).unwrap_or_else(|| {
                        parent.join(extractor::classify_path(path).folder_name())
                    });
                    Effect::Move {
                        from: path.clone(),
                        to: free_name(dir.join(file_name(path)), &mut taken),
                    }
                }
                ActionKind::Compress => {
                    let mut gz = path.as_os_str().to_os_string();
                    gz.push(".gz");
                    Effect::Compress {
                        from: path.clone(),
                        to: free_name(PathBuf::from(gz), &mut taken),
                    }
                }
            }
        })
        .collect();

    ExecutionPlan { kind, effects }
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Bound for lock waits and each backup or mutation call.
    pub timeout: Duration,
    pub cancel: Option<CancelToken>,
}

impl ExecuteOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout, cancel: None }
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |c| c.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub mode: ExecutionMode,
    pub kind: ActionKind,
    /// Planned effects for a dry run, performed ones for a commit.
    pub effects: Vec<Effect>,
    pub succeeded: Vec<PathBuf>,
    pub failures: Vec<ExecutionFailure>,
    pub checkpoint_id: Option<String>,
    pub bytes_freed: u64,
}

impl ExecutionResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && !self.succeeded.is_empty()
    }
}

pub struct Executor {
    checkpoints: Arc<CheckpointManager>,
    learning: Arc<LearningStore>,
    ops: Arc<dyn FileOps>,
}

impl Executor {
    pub fn new(checkpoints: Arc<CheckpointManager>, learning: Arc<LearningStore>, ops: Arc<dyn FileOps>) -> Self {
        Self {
            checkpoints,
            learning,
            ops,
        }
    }

    pub fn execute(
        &self,
        recommendation: &Recommendation,
        mode: ExecutionMode,
        options: &ExecuteOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<ExecutionResult> {
        if options.cancelled() {
            return Err(Error::Cancelled);
        }
        let plan = plan(recommendation);
        let execution_id = uuid::Uuid::new_v4().to_string();

        match mode {
            ExecutionMode::DryRun => {
                debug!("Dry run {}: {} effects", execution_id, plan.effects.len());
                Ok(ExecutionResult {
                    execution_id,
                    mode,
                    kind: plan.kind,
                    effects: plan.effects,
                    succeeded: Vec::new(),
                    failures: Vec::new(),
                    checkpoint_id: None,
                    bytes_freed: 0,
                })
            }
            ExecutionMode::Commit if plan.kind.is_mutating() => {
                self.commit(recommendation, plan, execution_id, options, reporter)
            }
            ExecutionMode::Commit => {
                let result = ExecutionResult {
                    execution_id,
                    mode,
                    kind: plan.kind,
                    succeeded: plan.effects.iter().map(|e| e.source().to_path_buf()).collect(),
                    effects: plan.effects,
                    failures: Vec::new(),
                    checkpoint_id: None,
                    bytes_freed: 0,
                };
                self.report_outcome(&result, None, Utc::now());
                Ok(result)
            }
        }
    }

    fn commit(
        &self,
        recommendation: &Recommendation,
        plan: ExecutionPlan,
        execution_id: String,
        options: &ExecuteOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<ExecutionResult> {
        let targets: Vec<PathBuf> = plan.effects.iter().map(|e| e.source().to_path_buf()).collect();
        let guard = self
            .checkpoints
            .locks()
            .acquire(path_keys(&targets), options.timeout)?;

        // Last point where cancelling is honored.
        if options.cancelled() {
            info!("Execution {} cancelled before checkpoint", execution_id);
            return Err(Error::Cancelled);
        }

        reporter.on_backup_start(targets.len());
        let backup_start = Instant::now();
        let now = Utc::now();
        let checkpoint = Arc::new(self.checkpoints.create_locked(
            &guard,
            plan.kind,
            recommendation.description(),
            &targets,
            options.timeout,
            now,
        )?);
        if !checkpoint.covers(&targets) {
            return Err(Error::InvalidState(format!(
                "checkpoint {} does not cover every target",
                checkpoint.id
            )));
        }
        reporter.on_backup_complete(checkpoint.total_bytes, backup_start.elapsed().as_secs_f64());

        let start = Instant::now();
        let total = plan.effects.len();
        let mut result = ExecutionResult {
            execution_id,
            mode: ExecutionMode::Commit,
            kind: plan.kind,
            effects: Vec::with_capacity(total),
            succeeded: Vec::with_capacity(total),
            failures: Vec::new(),
            checkpoint_id: Some(checkpoint.id.clone()),
            bytes_freed: 0,
        };

        for (done, effect) in plan.effects.into_iter().enumerate() {
            match self.apply(&effect, &checkpoint, options.timeout) {
                Ok(freed) => {
                    if let Err(e) = self.checkpoints.record_effect(&checkpoint, effect.source(), effect.artifact()) {
                        error!("Could not record effect on {}: {}", effect.source().display(), e);
                    }
                    let original = checkpoint.entry_for(effect.source()).map_or(0, |e| e.size);
                    result.bytes_freed += match &effect {
                        Effect::Delete { .. } => original,
                        Effect::Compress { .. } => original.saturating_sub(freed),
                        _ => 0,
                    };
                    result.succeeded.push(effect.source().to_path_buf());
                    result.effects.push(effect);
                }
                Err(e) => {
                    warn!("{} failed on {}: {}", plan.kind, effect.source().display(), e);
                    result.failures.push(ExecutionFailure {
                        path: effect.source().to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            }
            reporter.on_execute_progress(done + 1, total);
        }
        drop(guard);

        info!(
            "Execution {} ({}): {} succeeded, {} failed, checkpoint {}",
            result.execution_id,
            result.kind,
            result.succeeded.len(),
            result.failures.len(),
            checkpoint.id
        );
        reporter.on_execute_complete(
            result.succeeded.len(),
            result.failures.len(),
            start.elapsed().as_secs_f64(),
        );

        self.report_outcome(&result, Some(checkpoint.as_ref()), now);
        Ok(result)
    }

    /// Perform one effect under the timeout. Returns the compressed size for
    /// compress effects and zero otherwise. A mutation that completes after
    /// its timeout is still recorded on the checkpoint so undo can find it.
    fn apply(&self, effect: &Effect, checkpoint: &Arc<Checkpoint>, timeout: Duration) -> Result<u64> {
        let late = {
            let checkpoints = Arc::clone(&self.checkpoints);
            let checkpoint = Arc::clone(checkpoint);
            let effect = effect.clone();
            move |outcome: std::io::Result<u64>| match outcome {
                Ok(_) => {
                    warn!(
                        "{} finished after its timeout, recording it on checkpoint {}",
                        effect.source().display(),
                        checkpoint.id
                    );
                    if let Err(e) = checkpoints.record_effect(&checkpoint, effect.source(), effect.artifact()) {
                        error!("Could not record late effect on {}: {}", effect.source().display(), e);
                    }
                }
                Err(e) => debug!("Timed out operation on {} later failed: {}", effect.source().display(), e),
            }
        };

        let ops = Arc::clone(&self.ops);
        match effect.clone() {
            Effect::Delete { path } => {
                let what = format!("delete of {}", path.display());
                bounded_or_late(timeout, &what, move || ops.remove(&path).map(|_| 0), late)
            }
            Effect::Move { from, to } => {
                let what = format!("move of {}", from.display());
                bounded_or_late(timeout, &what, move || ops.relocate(&from, &to).map(|_| 0), late)
            }
            Effect::Compress { from, to } => {
                let what = format!("compression of {}", from.display());
                bounded_or_late(timeout, &what, move || ops.compress(&from, &to), late)
            }
            Effect::Review { .. } => Ok(0),
        }
    }

    /// Feed an accepted outcome to the learning store. Failures here are
    /// logged; the files have already changed and the result stands.
    fn report_outcome(&self, result: &ExecutionResult, checkpoint: Option<&Checkpoint>, now: DateTime<Utc>) {
        let mut outcome = Outcome::new(result.execution_id.clone(), result.kind, true);
        outcome.succeeded = result.succeeded.len();
        outcome.failed = result.failures.len();
        if let Some(checkpoint) = checkpoint.filter(|_| result.kind == ActionKind::Cleanup) {
            outcome.mean_age_days = mean_age_days(checkpoint, &result.succeeded, now);
        }
        if let Err(e) = self.learning.record_outcome(&outcome, now) {
            error!("Could not record outcome of {}: {}", result.execution_id, e);
        }
    }

    /// Record that the user turned a recommendation down.
    pub fn reject(&self, recommendation: &Recommendation) -> Result<bool> {
        let outcome = Outcome::new(uuid::Uuid::new_v4().to_string(), recommendation.kind(), false);
        self.learning.record_outcome(&outcome, Utc::now())
    }
}

fn mean_age_days(checkpoint: &Checkpoint, paths: &[PathBuf], now: DateTime<Utc>) -> Option<f64> {
    let ages: Vec<f64> = paths
        .iter()
        .filter_map(|p| checkpoint.entry_for(p))
        .map(|e| {
            let modified = DateTime::<Utc>::from(e.stamp.modified());
            (now - modified).num_seconds().max(0) as f64 / 86_400.0
        })
        .collect();
    (!ages.is_empty()).then(|| ages.iter().sum::<f64>() / ages.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Factor;
    use tempfile::tempdir;

    fn rec(kind: ActionKind, targets: Vec<PathBuf>, destination: Option<PathBuf>) -> Recommendation {
        Recommendation::new(kind, targets, 80u8, vec![Factor::new("test", 80u8)], destination, "test").unwrap()
    }

    #[test]
    fn test_plan_resolves_collisions() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("Archive");
        std::fs::create_dir(&archive).unwrap();
        std::fs::write(archive.join("a.txt"), b"taken").unwrap();

        let targets = vec![dir.path().join("a.txt"), dir.path().join("sub").join("a.txt")];
        let planned = plan(&rec(ActionKind::Archive, targets, Some(archive.clone())));
        let destinations: Vec<_> = planned.effects.iter().filter_map(|e| e.artifact()).collect();
        assert_eq!(destinations, vec![archive.join("a_1.txt").as_path(), archive.join("a_2.txt").as_path()]);
    }

    #[test]
    fn test_plan_defaults() {
        let organize = plan(&rec(ActionKind::Organize, vec![PathBuf::from("/nowhere/x/pic.jpg")], None));
        assert_eq!(
            organize.effects[0],
            Effect::Move {
                from: PathBuf::from("/nowhere/x/pic.jpg"),
                to: PathBuf::from("/nowhere/x/Images/pic.jpg"),
            }
        );
        let compress = plan(&rec(ActionKind::Compress, vec![PathBuf::from("/nowhere/log.txt")], None));
        assert_eq!(compress.effects[0].artifact(), Some(Path::new("/nowhere/log.txt.gz")));
        let archive = plan(&rec(ActionKind::Archive, vec![PathBuf::from("/nowhere/old.doc")], None));
        assert_eq!(archive.effects[0].artifact(), Some(Path::new("/nowhere/Archive/old.doc")));
    }

    #[test]
    fn test_numbered_without_extension() {
        assert_eq!(numbered(Path::new("/a/README"), 3), PathBuf::from("/a/README_3"));
    }
}
