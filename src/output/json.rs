//! JSON output formatting.

use serde::Serialize;
use serde_json::json;

use crate::error::SyncError;
use crate::sync::{OperationStatus, QueueOperation};

/// Format a list of operations as JSON
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_operations_json(
    operations: &[QueueOperation],
    status: OperationStatus,
) -> Result<String, SyncError> {
    let output = json!({
        "status": status,
        "count": operations.len(),
        "items": operations
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Generic JSON formatter for any serializable type
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, SyncError> {
    Ok(serde_json::to_string_pretty(value)?)
}
