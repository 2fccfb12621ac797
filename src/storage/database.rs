//! `SQLite` database connection and operations.
//!
//! The database is stored at `<data-dir>/queue.db` and holds the offline
//! operation queue.
//!
//! The connection sits behind a mutex so the queue can be shared between the
//! sync driver task and enqueuing callers. The guard must never be held
//! across an `.await`.

use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::config::Paths;
use crate::error::SyncError;

use super::migrations;

/// Database connection wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database in the given data directory.
    ///
    /// Creates the directory and database file and runs migrations if
    /// necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open(paths: &Paths) -> Result<Self, SyncError> {
        paths.ensure_dirs()?;
        Self::open_at(&paths.database)
    }

    /// Open the database at a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_at(path: &std::path::Path) -> Result<Self, SyncError> {
        let conn = Connection::open(path).map_err(|e| {
            SyncError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;

        // WAL keeps enqueues from other processes from blocking a drain pass
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
            .map_err(|e| SyncError::Database(format!("Failed to enable WAL: {e}")))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| SyncError::Database(format!("Failed to set busy timeout: {e}")))?;

        Self::with_connection(conn)
    }

    /// Open an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            SyncError::Database(format!("Failed to open in-memory database: {e}"))
        })?;

        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, SyncError> {
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get the current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, SyncError> {
        let conn = self.connection()?;
        migrations::get_version(&conn)
    }

    /// Lock and return the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns an error if a previous holder panicked while holding the lock.
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Database("Database connection lock poisoned".to_string()))
    }
}
