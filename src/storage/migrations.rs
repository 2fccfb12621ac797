//! Database migrations for portal-sync.
//!
//! Each migration upgrades the schema by one version. Migrations run
//! automatically when the database is opened.

use rusqlite::Connection;

use crate::error::SyncError;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Get the current schema version from the database.
///
/// Returns 0 if no version has been set (new database).
pub fn get_version(conn: &Connection) -> Result<i32, SyncError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| SyncError::Database(format!("Failed to get schema version: {e}")))
}

fn set_version(conn: &Connection, version: i32) -> Result<(), SyncError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| SyncError::Database(format!("Failed to set schema version: {e}")))
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<(), SyncError> {
    let current = get_version(conn)?;

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    for version in (current + 1)..=CURRENT_VERSION {
        log::debug!("Applying queue schema migration v{version}");
        run_migration(conn, version)?;
        set_version(conn, version)?;
    }

    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> Result<(), SyncError> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(SyncError::Database(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: the operation queue.
///
/// Timestamps are fixed-width RFC 3339 strings, so lexical order is
/// chronological order.
fn migrate_v1(conn: &Connection) -> Result<(), SyncError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity TEXT NOT NULL,
            operation_type TEXT NOT NULL,
            target_id TEXT,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_attempt TEXT,
            last_error TEXT,
            next_attempt_at TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
        );

        CREATE INDEX IF NOT EXISTS idx_sync_queue_status_id
        ON sync_queue(status, id);
        ",
    )
    .map_err(|e| SyncError::Database(format!("Migration v1 failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_v1() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);

        conn.execute(
            "INSERT INTO sync_queue (entity, operation_type, payload, created_at)
             VALUES ('patient', 'create', '{\"firstName\":\"A\"}', '2024-01-01T10:00:00.000000Z')",
            [],
        )
        .unwrap();

        let status: String = conn
            .query_row("SELECT status FROM sync_queue", [], |row| row.get(0))
            .unwrap();
        assert_eq!(status, "pending");
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();
        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_get_version_new_database() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_version(&conn).unwrap(), 0);
    }
}
