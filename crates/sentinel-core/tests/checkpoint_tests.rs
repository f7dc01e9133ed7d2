use chrono::{Duration as ChronoDuration, Utc};
use sentinel_core::checkpoint::{CheckpointManager, CheckpointState, LockKey, LockTable};
use sentinel_core::storage::{shared, Database};
use sentinel_core::ActionKind;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::tempdir;

const TIMEOUT: Duration = Duration::from_secs(5);

fn manager(root: &Path) -> CheckpointManager {
    CheckpointManager::new(
        shared(Database::open_in_memory().unwrap()),
        root.join("backups"),
        30,
        LockTable::new(),
    )
}

fn write_with_mtime(path: &Path, content: &[u8], mtime: SystemTime) {
    fs::write(path, content).unwrap();
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
}

#[test]
fn test_restore_is_byte_and_mtime_exact() {
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();

    let mtime = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    let a = data.join("a.bin");
    let b = data.join("b.txt");
    let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
    write_with_mtime(&a, &payload, mtime);
    write_with_mtime(&b, b"notes", mtime);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&a, fs::Permissions::from_mode(0o750)).unwrap();
    }

    let cp = mgr
        .create_checkpoint(ActionKind::Cleanup, "remove a and b", &[a.clone(), b.clone()], TIMEOUT)
        .unwrap();
    assert_eq!(cp.state, CheckpointState::Committed);
    assert_eq!(cp.file_count(), 2);
    assert_eq!(cp.total_bytes, 70_005);

    fs::remove_file(&a).unwrap();
    fs::write(&b, b"overwritten later").unwrap();

    let report = mgr.undo(&cp.id, TIMEOUT).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.state, CheckpointState::Reverted);
    assert_eq!(fs::read(&a).unwrap(), payload);
    assert_eq!(fs::read(&b).unwrap(), b"notes");
    assert_eq!(fs::metadata(&a).unwrap().modified().unwrap(), mtime);
    assert_eq!(fs::metadata(&b).unwrap().modified().unwrap(), mtime);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(fs::metadata(&a).unwrap().permissions().mode() & 0o777, 0o750);
    }

    // Blobs are released once reverted.
    assert!(!cp.blob_dir.exists());
    assert_eq!(mgr.get(&cp.id).unwrap().state, CheckpointState::Reverted);
}

#[test]
fn test_partial_undo_can_be_retried() {
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());
    let files: Vec<PathBuf> = (1..=3).map(|i| dir.path().join(format!("f{}.txt", i))).collect();
    for (i, f) in files.iter().enumerate() {
        fs::write(f, format!("content {}", i)).unwrap();
    }

    let cp = mgr
        .create_checkpoint(ActionKind::Cleanup, "three files", &files, TIMEOUT)
        .unwrap();
    for f in &files {
        fs::remove_file(f).unwrap();
    }

    // Damage the second blob so its checksum no longer matches.
    let damaged = cp.entry_for(&files[1]).unwrap().blob_path.clone();
    fs::write(&damaged, b"garbage").unwrap();

    let first = mgr.undo(&cp.id, TIMEOUT).unwrap();
    assert_eq!(first.restored, vec![files[0].clone(), files[2].clone()]);
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].path, files[1]);
    assert_eq!(first.state, CheckpointState::Committed);
    assert!(!files[1].exists());
    assert_eq!(mgr.undo_candidates(10).unwrap().len(), 1);

    fs::write(&damaged, b"content 1").unwrap();
    let second = mgr.undo(&cp.id, TIMEOUT).unwrap();
    assert_eq!(second.restored, vec![files[1].clone()]);
    assert_eq!(second.already_restored.len(), 2);
    assert_eq!(second.state, CheckpointState::Reverted);
    assert_eq!(fs::read_to_string(&files[1]).unwrap(), "content 1");
}

#[test]
fn test_sweep_expires_old_and_skips_busy() {
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    fs::write(&a, b"aaaa").unwrap();
    fs::write(&b, b"bb").unwrap();

    let old = mgr
        .create_checkpoint(ActionKind::Archive, "old", &[a.clone()], TIMEOUT)
        .unwrap();
    let busy = mgr
        .create_checkpoint(ActionKind::Archive, "busy", &[b.clone()], TIMEOUT)
        .unwrap();

    // Nothing is old enough yet.
    let report = mgr.sweep(Utc::now()).unwrap();
    assert!(report.expired.is_empty());

    let guard = mgr
        .locks()
        .acquire(vec![LockKey::Checkpoint(busy.id.clone())], TIMEOUT)
        .unwrap();
    let later = Utc::now() + ChronoDuration::days(31);
    let report = mgr.sweep(later).unwrap();
    assert_eq!(report.expired, vec![old.id.clone()]);
    assert_eq!(report.skipped, vec![busy.id.clone()]);
    assert_eq!(report.released_bytes, 4);
    assert!(!old.blob_dir.exists());
    assert_eq!(mgr.get(&old.id).unwrap().state, CheckpointState::Expired);

    drop(guard);
    let report = mgr.sweep(later).unwrap();
    assert_eq!(report.expired, vec![busy.id.clone()]);
    assert!(mgr.undo(&busy.id, TIMEOUT).is_err());
}

#[test]
fn test_locked_path_blocks_a_second_checkpoint() {
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());
    let a = dir.path().join("a.txt");
    fs::write(&a, b"x").unwrap();

    let _held = mgr
        .locks()
        .acquire(vec![LockKey::Path(a.clone())], TIMEOUT)
        .unwrap();
    let result = mgr.create_checkpoint(ActionKind::Cleanup, "t", &[a], Duration::from_millis(50));
    assert!(matches!(result, Err(sentinel_core::Error::Locked(_))));
}

#[test]
fn test_history_lists_newest_first() {
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());
    let mut ids = Vec::new();
    for i in 0..3 {
        let f = dir.path().join(format!("{}.txt", i));
        fs::write(&f, b"x").unwrap();
        ids.push(
            mgr.create_checkpoint(ActionKind::Cleanup, "t", &[f], TIMEOUT)
                .unwrap()
                .id,
        );
        std::thread::sleep(Duration::from_millis(5));
    }
    let listed: Vec<String> = mgr.history(10).unwrap().into_iter().map(|c| c.id).collect();
    ids.reverse();
    assert_eq!(listed, ids);
}

#[cfg(unix)]
#[test]
fn test_non_utf8_target_is_refused_before_backup() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());
    let good = dir.path().join("good.txt");
    let bad = dir.path().join(OsStr::from_bytes(b"bad\xff.txt"));
    fs::write(&good, b"fine").unwrap();
    fs::write(&bad, b"odd name").unwrap();

    let result = mgr.create_checkpoint(ActionKind::Cleanup, "mixed", &[good.clone(), bad.clone()], TIMEOUT);
    match result {
        Err(sentinel_core::Error::Backup(failure)) => assert_eq!(failure.path, bad),
        other => panic!("expected a backup failure, got {:?}", other),
    }

    // Nothing persisted and no blobs left behind.
    assert!(mgr.history(10).unwrap().is_empty());
    let leftovers = fs::read_dir(mgr.backup_root())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
    assert_eq!(fs::read(&bad).unwrap(), b"odd name");
}
