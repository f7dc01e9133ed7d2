//! Filesystem mutations behind a trait, and a timeout wrapper for any
//! blocking filesystem call.

use crate::error::{Error, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Run `f` on a worker thread and wait at most `timeout` for it. A call that
/// does not finish in time is reported as [`Error::Timeout`]; the worker is
/// left to finish in the background and its result is discarded.
pub fn bounded<T, F>(timeout: Duration, what: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    bounded_or_late(timeout, what, f, |_| {})
}

enum Handoff<T> {
    Waiting,
    Done(io::Result<T>),
    Abandoned,
}

/// Like [`bounded`], but a worker that finishes after the caller gave up
/// hands its result to `on_late` instead of dropping it. The caller either
/// receives the result or `on_late` does, never both and never neither.
pub fn bounded_or_late<T, F, L>(timeout: Duration, what: &str, f: F, on_late: L) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
    L: FnOnce(io::Result<T>) + Send + 'static,
{
    let slot = Arc::new((Mutex::new(Handoff::Waiting), Condvar::new()));
    let worker_slot = Arc::clone(&slot);
    thread::Builder::new()
        .name("sentinel-fsop".to_string())
        .spawn(move || {
            let result = f();
            let (lock, ready) = &*worker_slot;
            let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
            if let Handoff::Abandoned = *state {
                drop(state);
                on_late(result);
            } else {
                *state = Handoff::Done(result);
                ready.notify_one();
            }
        })?;

    let (lock, ready) = &*slot;
    let state = lock.lock().unwrap_or_else(|e| e.into_inner());
    let (mut state, _) = ready
        .wait_timeout_while(state, timeout, |s| matches!(s, Handoff::Waiting))
        .unwrap_or_else(|e| e.into_inner());
    match std::mem::replace(&mut *state, Handoff::Abandoned) {
        Handoff::Done(result) => result.map_err(Error::from),
        Handoff::Waiting | Handoff::Abandoned => Err(Error::Timeout {
            what: what.to_string(),
            after: timeout,
        }),
    }
}

/// The mutations the executor performs. Swappable so callers can route
/// them elsewhere and tests can inject failures.
pub trait FileOps: Send + Sync {
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Move `from` to `to`, never overwriting an existing file.
    fn relocate(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Gzip `from` into `to` and remove `from`. Returns the compressed size.
    fn compress(&self, from: &Path, to: &Path) -> io::Result<u64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileOps;

impl FileOps for StdFileOps {
    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn relocate(&self, from: &Path, to: &Path) -> io::Result<()> {
        if to.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            // Different filesystem: copy then remove.
            Err(_) => {
                fs::copy(from, to)?;
                if let Err(e) = fs::remove_file(from) {
                    let _ = fs::remove_file(to);
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    fn compress(&self, from: &Path, to: &Path) -> io::Result<u64> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        let write = || -> io::Result<u64> {
            let mut input = BufReader::new(File::open(from)?);
            let output = File::options().write(true).create_new(true).open(to)?;
            let mut encoder = GzEncoder::new(output, Compression::default());
            io::copy(&mut input, &mut encoder)?;
            let output = encoder.finish()?;
            output.sync_all()?;
            Ok(output.metadata()?.len())
        };

        match write() {
            Ok(size) => {
                fs::remove_file(from)?;
                Ok(size)
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::AlreadyExists {
                    let _ = fs::remove_file(to);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_bounded_times_out() {
        let err = bounded(Duration::from_millis(20), "sleep", || {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_bounded_passes_through_results() {
        assert_eq!(bounded(Duration::from_secs(5), "ok", || Ok(7)).unwrap(), 7);
        let err = bounded::<(), _>(Duration::from_secs(5), "fail", || {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "nope"))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_late_result_goes_to_callback() {
        let (tx, rx) = std::sync::mpsc::channel();
        let err = bounded_or_late(
            Duration::from_millis(20),
            "slow",
            || {
                thread::sleep(Duration::from_millis(200));
                Ok(5)
            },
            move |late| {
                let _ = tx.send(late.ok());
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(5));
    }

    #[test]
    fn test_prompt_result_skips_callback() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let value = bounded_or_late(Duration::from_secs(5), "fast", || Ok(3), move |_| {
            let _ = tx.send(());
        })
        .unwrap();
        assert_eq!(value, 3);
        // The callback (and its sender) is dropped unused once the worker exits.
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_relocate_never_overwrites() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("sub/b.txt");
        fs::write(&a, b"one").unwrap();
        StdFileOps.relocate(&a, &b).unwrap();
        assert!(!a.exists());
        assert_eq!(fs::read(&b).unwrap(), b"one");

        fs::write(&a, b"two").unwrap();
        assert!(StdFileOps.relocate(&a, &b).is_err());
        assert!(a.exists());
    }

    #[test]
    fn test_compress_round_trips() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("log.txt");
        let dst = dir.path().join("log.txt.gz");
        fs::write(&src, "hello ".repeat(1000)).unwrap();
        StdFileOps.compress(&src, &dst).unwrap();
        assert!(!src.exists());

        let mut text = String::new();
        GzDecoder::new(File::open(&dst).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "hello ".repeat(1000));
    }
}
