//! Queue management commands.

use colored::Colorize;
use serde_json::{json, Value};

use crate::cli::args::OutputFormat;
use crate::error::SyncError;
use crate::output::{format_operations, format_stats, to_json};
use crate::sync::{OperationRequest, OperationStatus, RouteTable, SyncQueue};

/// Add an operation to the queue.
///
/// Tags with no route are accepted; pretty output warns about them.
///
/// # Errors
///
/// Returns `SyncError::Config` if the payload is not valid JSON, or a
/// database error if the operation cannot be stored.
pub fn enqueue(
    queue: &SyncQueue,
    routes: &RouteTable,
    entity: &str,
    operation_type: &str,
    id: Option<String>,
    payload: &str,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let payload: Value = serde_json::from_str(payload)
        .map_err(|e| SyncError::Config(format!("Invalid --payload JSON: {e}")))?;

    let mut request = OperationRequest::new(entity, operation_type, payload);
    request.id = id;
    let tag = request.tag();
    let key = queue.enqueue(&request)?;
    let routable = routes.recognizes(&tag);

    match format {
        OutputFormat::Json => to_json(&json!({
            "id": key,
            "entity": request.entity,
            "type": request.operation_type,
            "target_id": request.id,
            "routable": routable,
        })),
        OutputFormat::Pretty => {
            let mut output = format!("Queued {tag} operation (ID: {key})");
            if !routable {
                output.push('\n');
                output.push_str(
                    &format!("Warning: no route matches {tag}; it will not be replayed")
                        .yellow()
                        .to_string(),
                );
            }
            Ok(output)
        },
    }
}

/// Show queue status.
///
/// # Errors
///
/// Returns an error if the queue cannot be read.
pub fn status(queue: &SyncQueue, format: OutputFormat) -> Result<String, SyncError> {
    format_stats(&queue.stats()?, format)
}

/// List queued operations with the given status, oldest first.
///
/// # Errors
///
/// Returns `SyncError::Config` for an unknown status, or an error if the
/// queue cannot be read.
pub fn list(
    queue: &SyncQueue,
    status: &str,
    limit: usize,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let status: OperationStatus = status.parse()?;
    let operations = queue.list_by_status(status, Some(limit))?;
    format_operations(&operations, status, format)
}

/// Move dead-lettered operations back to pending.
///
/// # Errors
///
/// Returns `SyncError::NotFound` for an unknown ID, or `SyncError::Config`
/// when neither an ID nor `--all` was given.
pub fn retry(
    queue: &SyncQueue,
    all: bool,
    id: Option<i64>,
    format: OutputFormat,
) -> Result<String, SyncError> {
    if let Some(op_id) = id {
        if !queue.requeue(op_id)? {
            return Err(SyncError::NotFound(format!("Operation {op_id}")));
        }

        match format {
            OutputFormat::Json => to_json(&json!({ "requeued": [op_id] })),
            OutputFormat::Pretty => Ok(format!("Reset operation {op_id} for retry")),
        }
    } else if all {
        let count = queue.requeue_all_dead()?;

        match format {
            OutputFormat::Json => to_json(&json!({ "requeued": count })),
            OutputFormat::Pretty => Ok(format!("Reset {count} dead-lettered operations for retry")),
        }
    } else {
        Err(SyncError::Config(
            "Specify --all or provide an operation ID".to_string(),
        ))
    }
}

/// Remove one operation.
///
/// # Errors
///
/// Returns `SyncError::NotFound` if no operation has the ID.
pub fn remove(queue: &SyncQueue, id: i64, format: OutputFormat) -> Result<String, SyncError> {
    if !queue.remove(id)? {
        return Err(SyncError::NotFound(format!("Operation {id}")));
    }

    match format {
        OutputFormat::Json => to_json(&json!({ "removed": id })),
        OutputFormat::Pretty => Ok(format!("Removed operation {id}")),
    }
}

/// Clear dead letters, or everything with `--all --force`.
///
/// # Errors
///
/// Returns `SyncError::Config` when the flags are incomplete.
pub fn clear(
    queue: &SyncQueue,
    dead_letters: bool,
    all: bool,
    force: bool,
    format: OutputFormat,
) -> Result<String, SyncError> {
    if all {
        if !force {
            return Err(SyncError::Config(
                "Use --force to clear all operations, pending included".to_string(),
            ));
        }
        let count = queue.clear()?;

        match format {
            OutputFormat::Json => to_json(&json!({ "cleared": count, "scope": "all" })),
            OutputFormat::Pretty => Ok(format!("Cleared all {count} operations from queue")),
        }
    } else if dead_letters {
        let count = queue.purge_dead_letters()?;

        match format {
            OutputFormat::Json => to_json(&json!({ "cleared": count, "scope": "dead_letter" })),
            OutputFormat::Pretty => Ok(format!("Cleared {count} dead-lettered operations")),
        }
    } else {
        Err(SyncError::Config(
            "Specify --dead-letters or --all --force".to_string(),
        ))
    }
}
