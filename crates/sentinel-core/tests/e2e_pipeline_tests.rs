use chrono::{Duration as ChronoDuration, Utc};
use sentinel_core::checkpoint::CheckpointState;
use sentinel_core::executor::Effect;
use sentinel_core::fsops::{FileOps, StdFileOps};
use sentinel_core::types::{Factor, SystemHealth};
use sentinel_core::{
    ActionKind, EngineConfig, Error, ExecuteOptions, ExecutionMode, Recommendation, SentinelEngine,
    SilentReporter,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

struct Fixture {
    _dir: TempDir,
    data: PathBuf,
    engine: SentinelEngine,
}

fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    let config = EngineConfig {
        root_paths: vec![data.to_string_lossy().into_owned()],
        backup_dir: dir.path().join("backups").to_string_lossy().into_owned(),
        fs_timeout_secs: 10,
        ..EngineConfig::default()
    };
    Fixture {
        engine: SentinelEngine::open_in_memory(config).unwrap(),
        data,
        _dir: dir,
    }
}

fn recommendation(kind: ActionKind, targets: Vec<PathBuf>, destination: Option<PathBuf>) -> Recommendation {
    Recommendation::new(kind, targets, 80u8, vec![Factor::new("test", 80u8)], destination, "test action").unwrap()
}

/// Delegates to the real filesystem but refuses to touch one file name.
struct FailOn(&'static str);

impl FailOn {
    fn check(&self, path: &Path) -> io::Result<()> {
        if path.file_name().map_or(false, |n| n == self.0) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "refused"));
        }
        Ok(())
    }
}

impl FileOps for FailOn {
    fn remove(&self, path: &Path) -> io::Result<()> {
        self.check(path)?;
        StdFileOps.remove(path)
    }

    fn relocate(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check(from)?;
        StdFileOps.relocate(from, to)
    }

    fn compress(&self, from: &Path, to: &Path) -> io::Result<u64> {
        self.check(from)?;
        StdFileOps.compress(from, to)
    }
}

/// Moves files, but only after a pause.
struct SlowMove(Duration);

impl FileOps for SlowMove {
    fn remove(&self, path: &Path) -> io::Result<()> {
        StdFileOps.remove(path)
    }

    fn relocate(&self, from: &Path, to: &Path) -> io::Result<()> {
        thread::sleep(self.0);
        StdFileOps.relocate(from, to)
    }

    fn compress(&self, from: &Path, to: &Path) -> io::Result<u64> {
        StdFileOps.compress(from, to)
    }
}

#[test]
fn test_scan_analyze_dry_run_commit_undo() {
    let fx = fixture();
    let draft = fx.data.join("draft.tmp");
    let swap = fx.data.join("notes.swp");
    fs::write(&draft, b"half written").unwrap();
    fs::write(&swap, b"editor state").unwrap();
    fs::write(fx.data.join("keep.txt"), b"keep me").unwrap();

    let walk = fx.engine.scan(&SilentReporter);
    assert!(walk.errors.is_empty());
    assert_eq!(walk.file_count(), 3);

    let report = fx.engine.analyze(&walk.snapshots, None, &SilentReporter).unwrap();
    assert_eq!(report.files, 3);
    let cleanup = report
        .recommendations
        .iter()
        .find(|r| r.kind() == ActionKind::Cleanup && r.targets().contains(&draft))
        .expect("temporary files are suggested for cleanup")
        .clone();
    let keep = fx.data.join("keep.txt");
    assert!(!report
        .recommendations
        .iter()
        .any(|r| r.kind() == ActionKind::Cleanup && r.targets().contains(&keep)));

    let options = fx.engine.execute_options();
    let preview = fx
        .engine
        .execute(&cleanup, ExecutionMode::DryRun, &options, &SilentReporter)
        .unwrap();
    assert!(preview.effects.contains(&Effect::Delete { path: draft.clone() }));
    assert!(preview.checkpoint_id.is_none());
    assert!(draft.exists());
    assert!(fx.engine.history(10).unwrap().is_empty());

    let result = fx
        .engine
        .execute(&cleanup, ExecutionMode::Commit, &options, &SilentReporter)
        .unwrap();
    assert!(result.is_complete());
    assert!(!draft.exists());
    assert!(result.bytes_freed >= 12);
    let checkpoint_id = result.checkpoint_id.clone().unwrap();
    assert_eq!(fx.engine.checkpoint(&checkpoint_id).unwrap().file_count(), cleanup.targets().len());

    let restored = fx.engine.undo(&checkpoint_id).unwrap();
    assert!(restored.is_complete());
    assert_eq!(fs::read(&draft).unwrap(), b"half written");
    assert_eq!(fx.engine.learning_report().counters[&ActionKind::Cleanup].accepted, 1);
}

#[test]
fn test_partial_commit_keeps_checkpoint_undoable() {
    let fx = fixture();
    let files: Vec<PathBuf> = (1..=5).map(|i| fx.data.join(format!("f{}.tmp", i))).collect();
    for f in &files {
        fs::write(f, b"12345").unwrap();
    }
    let engine = fx.engine.with_file_ops(Arc::new(FailOn("f3.tmp")));

    let rec = recommendation(ActionKind::Cleanup, files.clone(), None);
    let result = engine
        .execute(&rec, ExecutionMode::Commit, &engine.execute_options(), &SilentReporter)
        .unwrap();

    assert!(result.is_partial());
    assert_eq!(result.succeeded.len(), 4);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].path, files[2]);
    assert_eq!(result.bytes_freed, 20);
    assert!(files[2].exists());
    assert!(!files[0].exists());

    let id = result.checkpoint_id.unwrap();
    assert_eq!(engine.undo_candidates(10).unwrap()[0].id, id);
    let restored = engine.undo_last().unwrap();
    assert!(restored.is_complete());
    for f in &files {
        assert_eq!(fs::read(f).unwrap(), b"12345");
    }
    assert_eq!(engine.checkpoint(&id).unwrap().state, CheckpointState::Reverted);
}

#[test]
fn test_archive_and_compress_undo_remove_their_output() {
    let fx = fixture();
    let report = fx.data.join("report.pdf");
    let log = fx.data.join("server.log");
    fs::write(&report, b"pdf bytes").unwrap();
    fs::write(&log, "line\n".repeat(2000)).unwrap();
    let options = fx.engine.execute_options();

    let archive = recommendation(ActionKind::Archive, vec![report.clone()], None);
    let moved = fx
        .engine
        .execute(&archive, ExecutionMode::Commit, &options, &SilentReporter)
        .unwrap();
    let archived = fx.data.join("Archive").join("report.pdf");
    assert!(archived.exists());
    assert!(!report.exists());

    let compress = recommendation(ActionKind::Compress, vec![log.clone()], None);
    let packed = fx
        .engine
        .execute(&compress, ExecutionMode::Commit, &options, &SilentReporter)
        .unwrap();
    let gz = fx.data.join("server.log.gz");
    assert!(gz.exists());
    assert!(!log.exists());
    assert!(packed.bytes_freed > 0);

    fx.engine.undo(&packed.checkpoint_id.unwrap()).unwrap();
    assert!(!gz.exists());
    assert_eq!(fs::read_to_string(&log).unwrap(), "line\n".repeat(2000));

    fx.engine.undo(&moved.checkpoint_id.unwrap()).unwrap();
    assert!(!archived.exists());
    assert_eq!(fs::read(&report).unwrap(), b"pdf bytes");
}

#[test]
fn test_cancelled_execution_changes_nothing() {
    let fx = fixture();
    let file = fx.data.join("a.tmp");
    fs::write(&file, b"a").unwrap();

    let options = ExecuteOptions {
        cancel: Some(Arc::new(AtomicBool::new(true))),
        ..fx.engine.execute_options()
    };
    let rec = recommendation(ActionKind::Cleanup, vec![file.clone()], None);
    let err = fx
        .engine
        .execute(&rec, ExecutionMode::Commit, &options, &SilentReporter)
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(file.exists());
    assert!(fx.engine.history(10).unwrap().is_empty());
}

#[test]
fn test_review_commit_touches_no_files() {
    let fx = fixture();
    let file = fx.data.join("Odd Name.txt");
    fs::write(&file, b"x").unwrap();

    let rec = recommendation(ActionKind::Review, vec![file.clone()], None);
    let result = fx
        .engine
        .execute(&rec, ExecutionMode::Commit, &fx.engine.execute_options(), &SilentReporter)
        .unwrap();
    assert_eq!(result.succeeded, vec![file.clone()]);
    assert!(result.checkpoint_id.is_none());
    assert!(file.exists());
}

#[test]
fn test_maintenance_runs_only_when_idle_and_due() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    let mut config = EngineConfig {
        backup_dir: dir.path().join("backups").to_string_lossy().into_owned(),
        ..EngineConfig::default()
    };
    config.maintenance.idle_windows = vec![(0, 24)];
    let engine = SentinelEngine::open_in_memory(config).unwrap();

    let file = data.join("old.tmp");
    fs::write(&file, b"old").unwrap();
    let rec = recommendation(ActionKind::Cleanup, vec![file], None);
    let done = engine
        .execute(&rec, ExecutionMode::Commit, &engine.execute_options(), &SilentReporter)
        .unwrap();

    let idle = SystemHealth {
        free_bytes: 50,
        total_bytes: 100,
        idle: true,
        cpu_percent: 1.0,
    };
    let busy = SystemHealth { idle: false, ..idle.clone() };

    // Startup already swept.
    assert!(engine.run_maintenance(&idle, Utc::now()).unwrap().is_none());

    let later = Utc::now() + ChronoDuration::days(31);
    assert!(engine.run_maintenance(&busy, later).unwrap().is_none());
    let swept = engine.run_maintenance(&idle, later).unwrap().unwrap();
    assert_eq!(swept.expired, vec![done.checkpoint_id.clone().unwrap()]);

    // Not due again until the interval passes.
    assert!(engine.run_maintenance(&idle, later).unwrap().is_none());
    assert!(engine.undo(&done.checkpoint_id.unwrap()).is_err());
}

#[test]
fn test_move_finishing_after_its_timeout_is_still_undone() {
    let fx = fixture();
    let report = fx.data.join("slow.pdf");
    fs::write(&report, b"slow bytes").unwrap();
    let engine = fx.engine.with_file_ops(Arc::new(SlowMove(Duration::from_millis(800))));

    let rec = recommendation(ActionKind::Archive, vec![report.clone()], None);
    let options = ExecuteOptions::with_timeout(Duration::from_millis(200));
    let result = engine
        .execute(&rec, ExecutionMode::Commit, &options, &SilentReporter)
        .unwrap();
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].reason.contains("timed out"));
    let id = result.checkpoint_id.clone().unwrap();
    let archived = fx.data.join("Archive").join("slow.pdf");

    // The move lands in the background and is recorded on the checkpoint.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let entry = engine.checkpoint(&id).unwrap().entries[0].clone();
        if entry.applied {
            assert_eq!(entry.artifact.as_deref(), Some(archived.as_path()));
            break;
        }
        assert!(Instant::now() < deadline, "late move was never recorded");
        thread::sleep(Duration::from_millis(50));
    }
    assert!(archived.exists());
    assert!(!report.exists());

    let restored = engine.undo(&id).unwrap();
    assert!(restored.is_complete());
    assert!(!archived.exists());
    assert_eq!(fs::read(&report).unwrap(), b"slow bytes");
}
