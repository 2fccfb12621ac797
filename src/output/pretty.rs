use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::sync::{
    DrainReport, ExecutionResult, OperationOutcome, OperationStatus, QueueOperation, QueueStats,
};

const ERROR_WIDTH: usize = 50;

/// Format queued operations as a table
pub fn format_operations_pretty(operations: &[QueueOperation], status: OperationStatus) -> String {
    if operations.is_empty() {
        return format!("No {status} operations in queue.");
    }

    let mut lines = Vec::new();
    lines.push(format!(
        "{} Operations ({})",
        status.to_string().to_uppercase(),
        operations.len()
    ));
    lines.push("─".repeat(64));
    lines.push(format!(
        "{:<6} {:<18} {:<14} {:<18} {}",
        "ID", "Tag", "Target", "Created", "Retries"
    ));
    lines.push("─".repeat(64));

    for op in operations {
        let retries = if op.retry_count > 0 {
            op.retry_count.to_string().yellow().to_string()
        } else {
            "0".dimmed().to_string()
        };

        lines.push(format!(
            "{:<6} {:<18} {:<14} {:<18} {}",
            op.id,
            op.tag().to_string(),
            op.target_id.as_deref().unwrap_or("-"),
            op.created_at.format("%Y-%m-%d %H:%M").to_string(),
            retries
        ));

        if let Some(error) = &op.last_error {
            lines.push(format!("       {}", truncate(error, ERROR_WIDTH).red()));
        }
        if let Some(at) = op.next_attempt_at.filter(|_| status == OperationStatus::Pending) {
            lines.push(format!(
                "       {}",
                format!("next attempt {}", at.format("%H:%M:%S")).dimmed()
            ));
        }
    }

    lines.join("\n")
}

/// Format queue statistics
pub fn format_stats_pretty(stats: &QueueStats) -> String {
    let mut lines = Vec::new();

    lines.push("Sync Queue Status".bold().to_string());
    lines.push("─".repeat(40));

    lines.push(format!(
        "  Pending:      {} {}",
        stats.pending,
        if stats.pending > 0 {
            "operations waiting".dimmed()
        } else {
            "".dimmed()
        }
    ));

    lines.push(format!(
        "  Dead letter:  {} {}",
        stats.dead_letter,
        if stats.dead_letter > 0 {
            "operations need attention".red()
        } else {
            "".normal()
        }
    ));

    if stats.max_retry_count > 0 {
        lines.push(format!(
            "  Max retries:  {}",
            stats.max_retry_count.to_string().yellow()
        ));
    }

    if let Some(oldest) = stats.oldest_pending {
        lines.push(format!("  Oldest:       {}", age(oldest, Utc::now()).dimmed()));
    }

    if stats.pending > 0 {
        lines.push(String::new());
        lines.push(
            "Run 'portal-sync run' to replay pending operations"
                .dimmed()
                .to_string(),
        );
    }

    lines.join("\n")
}

/// Format the result of a drain pass
pub fn format_drain_report_pretty(report: &DrainReport, dry_run: bool) -> String {
    if report.total() == 0 {
        return "No pending operations to sync.".to_string();
    }

    let mut lines = Vec::new();
    let title = if dry_run { "Dry run" } else { "Sync completed" };
    lines.push(format!("{title}: {} operations", report.total()));
    lines.push("─".repeat(40));

    let verb = if dry_run { "would replay" } else { "replayed" };
    let counts = [
        (report.succeeded, "✓".green(), verb, "green"),
        (report.failed, "✗".red(), "failed", "red"),
        (report.dead_lettered, "✗".red(), "dead-lettered", "red"),
        (report.deferred, "○".yellow(), "deferred", "yellow"),
        (report.unroutable, "○".yellow(), "unroutable", "yellow"),
    ];
    for (count, icon, label, color) in counts {
        if count > 0 {
            lines.push(format!("  {icon} {}", format!("{count} {label}").color(color)));
        }
    }

    if dry_run {
        let planned: Vec<String> = report.results.iter().filter_map(planned_request).collect();
        if !planned.is_empty() {
            lines.push(String::new());
            lines.extend(planned);
        }
    }

    // Show first few errors
    let errors: Vec<&ExecutionResult> = report
        .results
        .iter()
        .filter(|r| error_of(&r.outcome).is_some())
        .take(3)
        .collect();

    if !errors.is_empty() {
        lines.push(String::new());
        lines.push("Errors:".to_string());
        for result in errors {
            lines.push(format!(
                "  - #{} {}: {}",
                result.id,
                result.tag,
                truncate(error_of(&result.outcome).unwrap_or_default(), ERROR_WIDTH)
            ));
        }
    }

    lines.join("\n")
}

fn planned_request(result: &ExecutionResult) -> Option<String> {
    match &result.outcome {
        OperationOutcome::WouldReplay { method, path } => Some(format!(
            "  #{:<5} {:<7} {}",
            result.id,
            method.to_string().cyan(),
            path
        )),
        _ => None,
    }
}

fn error_of(outcome: &OperationOutcome) -> Option<&str> {
    match outcome {
        OperationOutcome::Failed { error, .. } => Some(error),
        OperationOutcome::DeadLettered { reason, .. } | OperationOutcome::Unroutable { reason } => {
            Some(reason)
        },
        _ => None,
    }
}

fn age(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(since);
    if age.num_days() > 0 {
        format!("{} days ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{} hours ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{} minutes ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let head: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{head}...")
}
