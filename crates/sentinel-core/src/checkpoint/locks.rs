use crate::error::{Error, Result};
use ahash::AHashSet;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    Path(PathBuf),
    Checkpoint(String),
}

impl LockKey {
    fn describe(&self) -> String {
        match self {
            LockKey::Path(p) => p.display().to_string(),
            LockKey::Checkpoint(id) => format!("checkpoint {}", id),
        }
    }
}

/// Exclusive locks over paths and checkpoints. A set of keys is taken all at
/// once or not at all, so two holders can never wait on each other.
#[derive(Debug, Default)]
pub struct LockTable {
    held: Mutex<AHashSet<LockKey>>,
    released: Condvar,
}

impl LockTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn held(&self) -> MutexGuard<'_, AHashSet<LockKey>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout` for every key to be free, then take them all.
    pub fn acquire(self: &Arc<Self>, keys: Vec<LockKey>, timeout: Duration) -> Result<LockGuard> {
        let keys = dedup(keys);
        let deadline = Instant::now() + timeout;
        let mut held = self.held();

        loop {
            match keys.iter().find(|k| held.contains(*k)) {
                None => {
                    held.extend(keys.iter().cloned());
                    return Ok(LockGuard {
                        table: Arc::clone(self),
                        keys,
                    });
                }
                Some(busy) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Locked(busy.describe()));
                    }
                    held = self
                        .released
                        .wait_timeout(held, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Take every key if all are free right now.
    pub fn try_acquire(self: &Arc<Self>, keys: Vec<LockKey>) -> Option<LockGuard> {
        let keys = dedup(keys);
        let mut held = self.held();
        if keys.iter().any(|k| held.contains(k)) {
            return None;
        }
        held.extend(keys.iter().cloned());
        Some(LockGuard {
            table: Arc::clone(self),
            keys,
        })
    }

    pub fn is_held(&self, key: &LockKey) -> bool {
        self.held().contains(key)
    }
}

fn dedup(keys: Vec<LockKey>) -> Vec<LockKey> {
    let mut seen = AHashSet::with_capacity(keys.len());
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

/// Held locks; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    table: Arc<LockTable>,
    keys: Vec<LockKey>,
}

impl LockGuard {
    pub fn covers(&self, key: &LockKey) -> bool {
        self.keys.contains(key)
    }

    pub fn covers_paths<P: AsRef<std::path::Path>>(&self, paths: &[P]) -> bool {
        paths
            .iter()
            .all(|p| self.covers(&LockKey::Path(p.as_ref().to_path_buf())))
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut held = self.table.held();
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.table.released.notify_all();
    }
}
