//! Sync executor for replaying queued operations.
//!
//! One call to [`SyncExecutor::execute_all`] is one drain pass: it snapshots
//! the pending operations, replays each against its routed endpoint, removes
//! successes and records failures on the surviving records.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use super::operation::{OperationTag, QueueOperation};
use super::queue::SyncQueue;
use super::retry::RetryPolicy;
use super::routes::{HttpMethod, ReplayRequest, RouteTable, Unroutable, UnroutablePolicy};
use crate::config::SyncConfig;
use crate::error::SyncError;

/// Sends a resolved request to the remote system.
///
/// `ApiClient` implements this over HTTP; tests substitute scripted mocks.
pub trait Transport: Send + Sync {
    /// Replay one request. `Err` carries the failure message recorded as the
    /// operation's last error.
    fn replay(
        &self,
        request: &ReplayRequest,
    ) -> impl Future<Output = Result<(), String>> + Send;
}

/// Configuration for the sync executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Backoff and retry ceiling
    pub retry: RetryPolicy,
    /// Handling of operations no route accepts
    pub unroutable: UnroutablePolicy,
    /// Partitions replayed concurrently; 1 is strictly sequential
    pub max_concurrency: usize,
    /// Resolve routes without sending anything or touching the queue
    pub dry_run: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            unroutable: UnroutablePolicy::default(),
            max_concurrency: 1,
            dry_run: false,
        }
    }
}

impl From<&SyncConfig> for ExecutorConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            unroutable: config.unroutable,
            max_concurrency: config.max_concurrency.max(1),
            dry_run: false,
        }
    }
}

/// What happened to one operation during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Replayed and removed from the queue.
    Replayed,
    /// Replay failed; the record stays pending.
    Failed { error: String, retry_count: u32 },
    /// Moved to the dead-letter state.
    DeadLettered { reason: String, retry_count: u32 },
    /// Still inside its backoff window; not attempted.
    Deferred { until: DateTime<Utc> },
    /// No route; left untouched.
    Unroutable { reason: String },
    /// Dry run: would have been sent.
    WouldReplay { method: HttpMethod, path: String },
}

/// Result of executing a single operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Operation key
    pub id: i64,
    /// Operation tag
    pub tag: OperationTag,
    /// What happened
    #[serde(flatten)]
    pub outcome: OperationOutcome,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Replayed and removed (or would be, in a dry run)
    pub succeeded: usize,
    /// Failed and kept pending
    pub failed: usize,
    /// Moved to the dead-letter state
    pub dead_lettered: usize,
    /// Skipped while inside their backoff window
    pub deferred: usize,
    /// No route matched
    pub unroutable: usize,
    /// Individual results
    pub results: Vec<ExecutionResult>,
}

impl DrainReport {
    /// Create an empty report.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            succeeded: 0,
            failed: 0,
            dead_lettered: 0,
            deferred: 0,
            unroutable: 0,
            results: Vec::new(),
        }
    }

    /// Add a result.
    pub fn add(&mut self, result: ExecutionResult) {
        match result.outcome {
            OperationOutcome::Replayed | OperationOutcome::WouldReplay { .. } => {
                self.succeeded += 1;
            },
            OperationOutcome::Failed { .. } => self.failed += 1,
            OperationOutcome::DeadLettered { .. } => self.dead_lettered += 1,
            OperationOutcome::Deferred { .. } => self.deferred += 1,
            OperationOutcome::Unroutable { .. } => self.unroutable += 1,
        }
        self.results.push(result);
    }

    /// Check if no replay failed.
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.dead_lettered == 0
    }

    /// Get total operations looked at.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.failed + self.dead_lettered + self.deferred + self.unroutable
    }
}

/// Executor for draining the sync queue.
pub struct SyncExecutor<T> {
    queue: Arc<SyncQueue>,
    transport: T,
    routes: RouteTable,
    config: ExecutorConfig,
}

impl<T: Transport> SyncExecutor<T> {
    /// Create an executor with the built-in routes and default config.
    #[must_use]
    pub fn new(queue: Arc<SyncQueue>, transport: T) -> Self {
        Self::with_config(queue, transport, RouteTable::default(), ExecutorConfig::default())
    }

    /// Create an executor with custom routes and config.
    #[must_use]
    pub const fn with_config(
        queue: Arc<SyncQueue>,
        transport: T,
        routes: RouteTable,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            routes,
            config,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run one drain pass over a snapshot of the pending operations.
    ///
    /// A failing operation never aborts the pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue itself cannot be read or written; the
    /// remaining operations are left for the next pass.
    pub async fn execute_all(&self) -> Result<DrainReport, SyncError> {
        let pending = self.queue.list_pending()?;
        let mut report = DrainReport::empty();
        if pending.is_empty() {
            return Ok(report);
        }

        let now = Utc::now();
        log::debug!("Draining {} pending operations", pending.len());

        if self.config.max_concurrency <= 1 {
            for operation in &pending {
                report.add(self.execute_one(operation, now).await?);
            }
            return Ok(report);
        }

        let partitions: Vec<_> = partition(pending)
            .into_iter()
            .map(|operations| self.execute_partition(operations, now))
            .collect();
        let batches: Vec<Result<Vec<ExecutionResult>, SyncError>> = stream::iter(partitions)
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        for batch in batches {
            for result in batch? {
                report.add(result);
            }
        }
        Ok(report)
    }

    async fn execute_partition(
        &self,
        operations: Vec<QueueOperation>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutionResult>, SyncError> {
        let mut results = Vec::with_capacity(operations.len());
        for operation in &operations {
            results.push(self.execute_one(operation, now).await?);
        }
        Ok(results)
    }

    /// Replay a single operation and update the queue accordingly.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue update fails.
    pub async fn execute_one(
        &self,
        operation: &QueueOperation,
        now: DateTime<Utc>,
    ) -> Result<ExecutionResult, SyncError> {
        let result = |outcome| ExecutionResult {
            id: operation.id,
            tag: operation.tag(),
            outcome,
        };

        if let Some(until) = operation.next_attempt_at.filter(|_| !operation.is_due(now)) {
            return Ok(result(OperationOutcome::Deferred { until }));
        }

        let request = match self.routes.resolve(operation) {
            Ok(request) => request,
            Err(reason) => return self.handle_unroutable(operation, &reason).map(result),
        };

        if self.config.dry_run {
            return Ok(result(OperationOutcome::WouldReplay {
                method: request.method,
                path: request.path,
            }));
        }

        match self.transport.replay(&request).await {
            Ok(()) => {
                self.queue.remove(operation.id)?;
                log::debug!(
                    "Replayed operation {} ({} {})",
                    operation.id,
                    request.method,
                    request.path
                );
                Ok(result(OperationOutcome::Replayed))
            },
            Err(error) => {
                let retry_count = operation.retry_count.saturating_add(1);

                if self.config.retry.is_exhausted(retry_count) {
                    self.queue.dead_letter(operation.id, retry_count, &error)?;
                    log::error!(
                        "Operation {} ({}) dead-lettered after {retry_count} attempts: {error}",
                        operation.id,
                        operation.tag()
                    );
                    return Ok(result(OperationOutcome::DeadLettered {
                        reason: error,
                        retry_count,
                    }));
                }

                let next_attempt_at = self.config.retry.next_attempt_at(retry_count, Utc::now());
                self.queue
                    .update_retry(operation.id, retry_count, &error, next_attempt_at)?;
                log::warn!(
                    "Replay of operation {} ({}) failed, attempt {retry_count}: {error}",
                    operation.id,
                    operation.tag()
                );
                Ok(result(OperationOutcome::Failed { error, retry_count }))
            },
        }
    }

    fn handle_unroutable(
        &self,
        operation: &QueueOperation,
        reason: &Unroutable,
    ) -> Result<OperationOutcome, SyncError> {
        let reason = reason.to_string();

        match self.config.unroutable {
            UnroutablePolicy::DeadLetter if !self.config.dry_run => {
                self.queue
                    .dead_letter(operation.id, operation.retry_count, &reason)?;
                log::error!("Operation {} dead-lettered: {reason}", operation.id);
                Ok(OperationOutcome::DeadLettered {
                    reason,
                    retry_count: operation.retry_count,
                })
            },
            _ => {
                log::debug!("Skipping operation {}: {reason}", operation.id);
                Ok(OperationOutcome::Unroutable { reason })
            },
        }
    }
}

/// Group operations by target, preserving queue order within each group and
/// the order in which groups first appear.
fn partition(operations: Vec<QueueOperation>) -> Vec<Vec<QueueOperation>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<QueueOperation>> = Vec::new();

    for operation in operations {
        let key = operation.partition_key();
        if let Some(&slot) = index.get(&key) {
            groups[slot].push(operation);
        } else {
            index.insert(key, groups.len());
            groups.push(vec![operation]);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::operation::OperationStatus;
    use serde_json::json;

    fn operation(id: i64, target_id: Option<&str>) -> QueueOperation {
        QueueOperation {
            id,
            entity: "patient".to_string(),
            operation_type: "update".to_string(),
            target_id: target_id.map(String::from),
            payload: json!({}),
            created_at: Utc::now(),
            retry_count: 0,
            last_attempt: None,
            last_error: None,
            next_attempt_at: None,
            status: OperationStatus::Pending,
        }
    }

    #[test]
    fn test_drain_report() {
        let tag = OperationTag::new("patient", "create");
        let mut report = DrainReport::empty();

        report.add(ExecutionResult {
            id: 1,
            tag: tag.clone(),
            outcome: OperationOutcome::Replayed,
        });
        report.add(ExecutionResult {
            id: 2,
            tag: tag.clone(),
            outcome: OperationOutcome::Failed {
                error: "server error".to_string(),
                retry_count: 1,
            },
        });
        report.add(ExecutionResult {
            id: 3,
            tag,
            outcome: OperationOutcome::Unroutable {
                reason: "unrecognized operation tag unknown/create".to_string(),
            },
        });

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.unroutable, 1);
        assert_eq!(report.total(), 3);
        assert!(!report.all_succeeded());
    }

    #[test]
    fn test_executor_config_from_sync_config() {
        let mut sync = SyncConfig::default();
        sync.max_concurrency = 0;
        let config = ExecutorConfig::from(&sync);
        assert_eq!(config.max_concurrency, 1);
        assert!(!config.dry_run);
        assert_eq!(config.unroutable, UnroutablePolicy::Skip);
    }

    #[test]
    fn test_partition_groups_by_target() {
        let groups = partition(vec![
            operation(1, Some("a")),
            operation(2, Some("b")),
            operation(3, Some("a")),
            operation(4, None),
            operation(5, None),
        ]);

        let ids: Vec<Vec<i64>> = groups
            .iter()
            .map(|g| g.iter().map(|op| op.id).collect())
            .collect();
        assert_eq!(ids, vec![vec![1, 3], vec![2], vec![4], vec![5]]);
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let result = ExecutionResult {
            id: 9,
            tag: OperationTag::new("test", "create"),
            outcome: OperationOutcome::Failed {
                error: "server error".to_string(),
                retry_count: 2,
            },
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["retry_count"], 2);
        assert_eq!(value["tag"]["type"], "create");
    }
}
