//! Output formatting for portal-sync.
//!
//! This module provides formatters for displaying queue state and drain
//! results in various formats.

mod json;
mod pretty;

use crate::cli::args::OutputFormat;
use crate::error::SyncError;
use crate::sync::{DrainReport, OperationStatus, QueueOperation, QueueStats};

pub use json::*;
pub use pretty::*;

/// Format queued operations based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_operations(
    operations: &[QueueOperation],
    status: OperationStatus,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_operations_pretty(operations, status)),
        OutputFormat::Json => format_operations_json(operations, status),
    }
}

/// Format queue statistics based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_stats(stats: &QueueStats, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_stats_pretty(stats)),
        OutputFormat::Json => to_json(stats),
    }
}

/// Format a drain report based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_drain_report(
    report: &DrainReport,
    dry_run: bool,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_drain_report_pretty(report, dry_run)),
        OutputFormat::Json => to_json(report),
    }
}
