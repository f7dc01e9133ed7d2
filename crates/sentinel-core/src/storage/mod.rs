pub mod models;
mod queries;
pub mod sqlite;

pub use sqlite::Database;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Connection shared by the rule store, learning store and checkpoint index.
pub type SharedDb = Arc<Mutex<Database>>;

pub fn shared(db: Database) -> SharedDb {
    Arc::new(Mutex::new(db))
}

/// Lock the shared connection. A panic while holding the lock leaves the
/// connection usable, since every write is its own statement or transaction.
pub fn lock_db(db: &SharedDb) -> MutexGuard<'_, Database> {
    db.lock().unwrap_or_else(PoisonError::into_inner)
}
