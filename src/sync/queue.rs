//! Sync queue storage and management.
//!
//! Durable, ordered storage of queued operations. Every method is a single
//! SQL statement, so concurrent enqueues during a drain pass are safe.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::operation::{OperationRequest, OperationStatus, QueueOperation};
use crate::config::Paths;
use crate::error::SyncError;
use crate::storage::Database;

const SELECT_COLUMNS: &str = "SELECT id, entity, operation_type, target_id, payload, created_at,
        retry_count, last_attempt, last_error, next_attempt_at, status
 FROM sync_queue";

/// Sync queue for managing offline operations.
pub struct SyncQueue {
    db: Database,
}

impl SyncQueue {
    /// Open the queue in the given data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(paths: &Paths) -> Result<Self, SyncError> {
        Ok(Self::with_database(Database::open(paths)?))
    }

    /// Open a queue backed by an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self, SyncError> {
        Ok(Self::with_database(Database::open_in_memory()?))
    }

    /// Create a sync queue with an existing database connection.
    #[must_use]
    pub const fn with_database(db: Database) -> Self {
        Self { db }
    }

    /// Append an operation and return its key.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation cannot be saved.
    pub fn enqueue(&self, request: &OperationRequest) -> Result<i64, SyncError> {
        let conn = self.db.connection()?;
        let payload = serde_json::to_string(&request.payload)?;

        conn.execute(
            r"INSERT INTO sync_queue (entity, operation_type, target_id, payload, created_at, status)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.entity,
                request.operation_type,
                request.id,
                payload,
                timestamp(Utc::now()),
                OperationStatus::Pending.as_str(),
            ],
        )
        .map_err(|e| SyncError::Database(format!("Failed to enqueue operation: {e}")))?;

        let id = conn.last_insert_rowid();
        log::debug!("Enqueued operation {id} ({})", request.tag());
        Ok(id)
    }

    /// Snapshot of all pending operations, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_pending(&self) -> Result<Vec<QueueOperation>, SyncError> {
        self.list_by_status(OperationStatus::Pending, None)
    }

    /// Operations with a given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_by_status(
        &self,
        status: OperationStatus,
        limit: Option<usize>,
    ) -> Result<Vec<QueueOperation>, SyncError> {
        let conn = self.db.connection()?;
        // SQLite treats a negative LIMIT as no limit
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));

        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE status = ?1 ORDER BY id ASC LIMIT ?2"
            ))
            .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![status.as_str(), limit], row_to_operation)
            .map_err(|e| SyncError::Database(format!("Failed to query operations: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| SyncError::Database(format!("Failed to read operation: {e}")))
    }

    /// Get a specific operation by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, id: i64) -> Result<Option<QueueOperation>, SyncError> {
        let conn = self.db.connection()?;

        conn.query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id], row_to_operation)
            .optional()
            .map_err(|e| SyncError::Database(format!("Failed to query operation: {e}")))
    }

    /// Delete an operation. Removing an absent key is not an error.
    ///
    /// Returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove(&self, id: i64) -> Result<bool, SyncError> {
        let conn = self.db.connection()?;

        let rows = conn
            .execute("DELETE FROM sync_queue WHERE id = ?1", [id])
            .map_err(|e| SyncError::Database(format!("Failed to remove operation: {e}")))?;

        Ok(rows > 0)
    }

    /// Rewrite the retry bookkeeping of an operation in place.
    ///
    /// Silently does nothing if the operation no longer exists. Returns
    /// whether a row was updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn update_retry(
        &self,
        id: i64,
        retry_count: u32,
        last_error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<bool, SyncError> {
        let conn = self.db.connection()?;

        let rows = conn
            .execute(
                r"UPDATE sync_queue SET
                  retry_count = ?1,
                  last_error = ?2,
                  last_attempt = ?3,
                  next_attempt_at = ?4
                  WHERE id = ?5",
                params![
                    retry_count,
                    last_error,
                    timestamp(Utc::now()),
                    next_attempt_at.map(timestamp),
                    id,
                ],
            )
            .map_err(|e| SyncError::Database(format!("Failed to update retry state: {e}")))?;

        Ok(rows > 0)
    }

    /// Move an operation to the dead-letter state with a reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn dead_letter(
        &self,
        id: i64,
        retry_count: u32,
        reason: &str,
    ) -> Result<bool, SyncError> {
        let conn = self.db.connection()?;

        let rows = conn
            .execute(
                r"UPDATE sync_queue SET
                  status = ?1,
                  retry_count = ?2,
                  last_error = ?3,
                  last_attempt = ?4,
                  next_attempt_at = NULL
                  WHERE id = ?5",
                params![
                    OperationStatus::DeadLetter.as_str(),
                    retry_count,
                    reason,
                    timestamp(Utc::now()),
                    id,
                ],
            )
            .map_err(|e| SyncError::Database(format!("Failed to dead-letter operation: {e}")))?;

        Ok(rows > 0)
    }

    /// Reset an operation to pending with a fresh retry budget.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn requeue(&self, id: i64) -> Result<bool, SyncError> {
        let conn = self.db.connection()?;

        let rows = conn
            .execute(
                r"UPDATE sync_queue SET
                  status = ?1,
                  retry_count = 0,
                  last_error = NULL,
                  next_attempt_at = NULL
                  WHERE id = ?2",
                params![OperationStatus::Pending.as_str(), id],
            )
            .map_err(|e| SyncError::Database(format!("Failed to requeue operation: {e}")))?;

        Ok(rows > 0)
    }

    /// Requeue every dead-lettered operation. Returns how many were reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn requeue_all_dead(&self) -> Result<usize, SyncError> {
        let conn = self.db.connection()?;

        conn.execute(
            r"UPDATE sync_queue SET
              status = ?1,
              retry_count = 0,
              last_error = NULL,
              next_attempt_at = NULL
              WHERE status = ?2",
            params![
                OperationStatus::Pending.as_str(),
                OperationStatus::DeadLetter.as_str()
            ],
        )
        .map_err(|e| SyncError::Database(format!("Failed to requeue operations: {e}")))
    }

    /// Delete every dead-lettered operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_dead_letters(&self) -> Result<usize, SyncError> {
        let conn = self.db.connection()?;

        conn.execute(
            "DELETE FROM sync_queue WHERE status = ?1",
            [OperationStatus::DeadLetter.as_str()],
        )
        .map_err(|e| SyncError::Database(format!("Failed to purge dead letters: {e}")))
    }

    /// Delete every operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear(&self) -> Result<usize, SyncError> {
        let conn = self.db.connection()?;

        conn.execute("DELETE FROM sync_queue", [])
            .map_err(|e| SyncError::Database(format!("Failed to clear queue: {e}")))
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self) -> Result<QueueStats, SyncError> {
        let conn = self.db.connection()?;

        let count = |status: OperationStatus| -> Result<i64, SyncError> {
            conn.query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE status = ?1",
                [status.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::Database(format!("Failed to count {status} operations: {e}")))
        };

        let pending = count(OperationStatus::Pending)?;
        let dead_letter = count(OperationStatus::DeadLetter)?;

        let oldest_pending: Option<String> = conn
            .query_row(
                "SELECT MIN(created_at) FROM sync_queue WHERE status = ?1",
                [OperationStatus::Pending.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::Database(format!("Failed to get oldest pending: {e}")))?;

        let max_retry_count: Option<u32> = conn
            .query_row(
                "SELECT MAX(retry_count) FROM sync_queue WHERE status = ?1",
                [OperationStatus::Pending.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::Database(format!("Failed to get retry counts: {e}")))?;

        Ok(QueueStats {
            pending,
            dead_letter,
            oldest_pending: oldest_pending
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc)),
            max_retry_count: max_retry_count.unwrap_or(0),
        })
    }
}

/// Queue statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Number of pending operations
    pub pending: i64,
    /// Number of dead-lettered operations
    pub dead_letter: i64,
    /// Oldest pending operation timestamp
    pub oldest_pending: Option<DateTime<Utc>>,
    /// Highest retry count among pending operations
    pub max_retry_count: u32,
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, s: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_operation(row: &Row<'_>) -> Result<QueueOperation, rusqlite::Error> {
    let payload: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let last_attempt: Option<String> = row.get(7)?;
    let next_attempt_at: Option<String> = row.get(9)?;
    let status: String = row.get(10)?;

    Ok(QueueOperation {
        id: row.get(0)?,
        entity: row.get(1)?,
        operation_type: row.get(2)?,
        target_id: row.get(3)?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        created_at: parse_timestamp(5, &created_at)?,
        retry_count: row.get(6)?,
        last_attempt: last_attempt.as_deref().map(|s| parse_timestamp(7, s)).transpose()?,
        last_error: row.get(8)?,
        next_attempt_at: next_attempt_at.as_deref().map(|s| parse_timestamp(9, s)).transpose()?,
        status: status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?,
    })
}
