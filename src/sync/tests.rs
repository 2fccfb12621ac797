//! Drain pass and driver behaviour against a scripted transport.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::config::{Paths, SyncConfig};
use crate::error::SyncError;

/// Transport that answers from a script, then from a fallback response.
#[derive(Clone, Default)]
struct MockTransport {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    script: Mutex<VecDeque<Result<(), String>>>,
    fallback: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<ReplayRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    fn succeeding() -> Self {
        Self::default()
    }

    fn failing(error: &str) -> Self {
        let transport = Self::default();
        *transport.inner.fallback.lock().unwrap() = Some(error.to_string());
        transport
    }

    fn scripted(responses: Vec<Result<(), String>>) -> Self {
        let transport = Self::default();
        *transport.inner.script.lock().unwrap() = responses.into();
        transport
    }

    fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.lock().unwrap() = delay;
        self
    }

    fn calls(&self) -> Vec<ReplayRequest> {
        self.inner.calls.lock().unwrap().clone()
    }

    fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    async fn replay(&self, request: &ReplayRequest) -> Result<(), String> {
        self.inner.calls.lock().unwrap().push(request.clone());
        let current = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.inner.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.inner.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| match self.inner.fallback.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        })
    }
}

fn driver_with<C: Connectivity>(
    transport: &MockTransport,
    connectivity: C,
    config: ExecutorConfig,
    interval: Duration,
) -> SyncDriver<MockTransport, C> {
    let queue = Arc::new(SyncQueue::in_memory().unwrap());
    let executor =
        SyncExecutor::with_config(queue, transport.clone(), RouteTable::default(), config);
    SyncDriver::with_executor(executor, connectivity, interval)
}

fn retry_forever() -> ExecutorConfig {
    ExecutorConfig {
        retry: RetryPolicy::unbounded(),
        ..ExecutorConfig::default()
    }
}

fn simple_driver(transport: &MockTransport) -> SyncDriver<MockTransport, AlwaysOnline> {
    driver_with(transport, AlwaysOnline, retry_forever(), Duration::from_secs(3600))
}

fn completed(outcome: DrainOutcome) -> DrainReport {
    match outcome {
        DrainOutcome::Completed(report) => report,
        other => panic!("expected a completed pass, got {other:?}"),
    }
}

fn patient(name: &str) -> OperationRequest {
    OperationRequest::patient_create(json!({ "firstName": name }))
}

#[tokio::test]
async fn test_successful_replay_empties_queue() {
    let transport = MockTransport::succeeding();
    let driver = simple_driver(&transport);
    driver.queue().enqueue(&patient("Ada")).unwrap();

    let report = completed(driver.drain_once().await.unwrap());

    assert_eq!(report.succeeded, 1);
    assert!(driver.queue().list_pending().unwrap().is_empty());
    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, HttpMethod::Post);
    assert_eq!(calls[0].path, "/patients");
    assert_eq!(calls[0].body, json!({ "firstName": "Ada" }));
}

#[tokio::test]
async fn test_failure_increments_retry_each_pass() {
    let transport = MockTransport::failing("server error");
    let driver = simple_driver(&transport);
    let id = driver.queue().enqueue(&patient("Ada")).unwrap();

    let report = completed(driver.drain_once().await.unwrap());
    assert_eq!(report.failed, 1);

    let op = driver.queue().get(id).unwrap().unwrap();
    assert_eq!(op.retry_count, 1);
    assert_eq!(op.last_error.as_deref(), Some("server error"));
    assert!(op.last_attempt.is_some());
    assert_eq!(op.status, OperationStatus::Pending);

    driver.drain_once().await.unwrap();
    let op = driver.queue().get(id).unwrap().unwrap();
    assert_eq!(op.retry_count, 2);
}

#[tokio::test]
async fn test_failed_operation_replays_on_next_pass() {
    let transport = MockTransport::scripted(vec![Err("server error".to_string()), Ok(())]);
    let driver = simple_driver(&transport);
    let id = driver.queue().enqueue(&patient("Ada")).unwrap();

    driver.drain_once().await.unwrap();
    assert_eq!(driver.queue().get(id).unwrap().unwrap().retry_count, 1);

    let report = completed(driver.drain_once().await.unwrap());
    assert_eq!(report.succeeded, 1);
    assert!(driver.queue().get(id).unwrap().is_none());
}

#[tokio::test]
async fn test_failure_does_not_block_later_operations() {
    let transport =
        MockTransport::scripted(vec![Err("server error".to_string()), Ok(()), Ok(())]);
    let driver = simple_driver(&transport);
    let first = driver.queue().enqueue(&patient("Ada")).unwrap();
    driver.queue().enqueue(&patient("Grace")).unwrap();
    driver
        .queue()
        .enqueue(&OperationRequest::test_create(json!({ "kind": "pcr" })))
        .unwrap();

    let report = completed(driver.drain_once().await.unwrap());

    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 2);
    let pending = driver.queue().list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, first);

    let paths: Vec<String> = transport.calls().into_iter().map(|c| c.path).collect();
    assert_eq!(paths, vec!["/patients", "/patients", "/tests"]);
}

#[tokio::test]
async fn test_unknown_tag_is_left_untouched() {
    let transport = MockTransport::succeeding();
    let driver = simple_driver(&transport);
    let id = driver
        .queue()
        .enqueue(&OperationRequest::new("unknown", "create", json!({})))
        .unwrap();

    for _ in 0..3 {
        let report = completed(driver.drain_once().await.unwrap());
        assert_eq!(report.unroutable, 1);
    }

    let op = driver.queue().get(id).unwrap().unwrap();
    assert_eq!(op.retry_count, 0);
    assert!(op.last_error.is_none());
    assert_eq!(op.status, OperationStatus::Pending);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_update_without_target_is_unroutable() {
    let transport = MockTransport::succeeding();
    let driver = simple_driver(&transport);
    driver
        .queue()
        .enqueue(&OperationRequest::new("patient", "update", json!({ "age": 40 })))
        .unwrap();

    let report = completed(driver.drain_once().await.unwrap());

    assert_eq!(report.unroutable, 1);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_update_routes_to_target() {
    let transport = MockTransport::succeeding();
    let driver = simple_driver(&transport);
    driver
        .queue()
        .enqueue(&OperationRequest::patient_update("p 1", json!({ "age": 40 })))
        .unwrap();

    driver.drain_once().await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].method, HttpMethod::Put);
    assert_eq!(calls[0].path, "/patients/p%201");
}

#[tokio::test]
async fn test_offline_pass_touches_nothing() {
    let transport = MockTransport::failing("server error");
    let driver = driver_with(
        &transport,
        ConnectivityFlag::new(false),
        retry_forever(),
        Duration::from_secs(3600),
    );
    let id = driver.queue().enqueue(&patient("Ada")).unwrap();
    let before = driver.queue().get(id).unwrap();

    assert_eq!(driver.drain_once().await.unwrap(), DrainOutcome::Offline);

    assert_eq!(driver.queue().get(id).unwrap(), before);
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_drain_is_rejected() {
    let transport = MockTransport::succeeding().with_delay(Duration::from_secs(1));
    let driver = simple_driver(&transport);
    driver.queue().enqueue(&patient("Ada")).unwrap();

    let (first, second) = tokio::join!(driver.drain_once(), driver.drain_once());

    assert_eq!(completed(first.unwrap()).succeeded, 1);
    assert_eq!(second.unwrap(), DrainOutcome::AlreadyRunning);
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_endpoint_never_overlaps_passes() {
    let transport = MockTransport::failing("slow").with_delay(Duration::from_millis(350));
    let driver = driver_with(
        &transport,
        AlwaysOnline,
        retry_forever(),
        Duration::from_millis(100),
    );
    for name in ["Ada", "Grace", "Linus"] {
        driver.queue().enqueue(&patient(name)).unwrap();
    }

    driver.start().unwrap();
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = driver.request_sync();
    }
    driver.shutdown().await.unwrap();

    assert_eq!(transport.max_in_flight(), 1);
    assert!(transport.calls().len() > 3);
}

#[tokio::test(start_paused = true)]
async fn test_connectivity_restored_triggers_pass() {
    let transport = MockTransport::succeeding();
    let flag = ConnectivityFlag::new(false);
    let driver = driver_with(
        &transport,
        flag.clone(),
        retry_forever(),
        Duration::from_secs(3600),
    );
    driver.queue().enqueue(&patient("Ada")).unwrap();
    driver.start().unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(driver.queue().list_pending().unwrap().len(), 1);

    flag.set_online(true);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(driver.queue().list_pending().unwrap().is_empty());
    driver.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_request_sync_runs_pass() {
    let transport = MockTransport::succeeding();
    let driver = simple_driver(&transport);
    driver.queue().enqueue(&patient("Ada")).unwrap();

    assert!(!driver.request_sync());

    driver.start().unwrap();
    assert!(driver.request_sync());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(driver.queue().list_pending().unwrap().is_empty());
    driver.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_timer_drains_after_interval() {
    let transport = MockTransport::succeeding();
    let driver = driver_with(
        &transport,
        AlwaysOnline,
        retry_forever(),
        Duration::from_millis(100),
    );
    driver.queue().enqueue(&patient("Ada")).unwrap();
    driver.start().unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(driver.queue().list_pending().unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(driver.queue().list_pending().unwrap().is_empty());
    driver.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_halts_ticks_and_restart_resumes() {
    let transport = MockTransport::succeeding();
    let driver = driver_with(
        &transport,
        AlwaysOnline,
        retry_forever(),
        Duration::from_millis(100),
    );
    assert_eq!(driver.state(), DriverState::Idle);

    driver.start().unwrap();
    assert_eq!(driver.state(), DriverState::Scheduled);
    driver.queue().enqueue(&patient("Ada")).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.calls().len(), 1);

    driver.stop().unwrap();
    assert_eq!(driver.state(), DriverState::Stopped);
    assert!(!driver.request_sync());

    driver.queue().enqueue(&patient("Grace")).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(driver.queue().list_pending().unwrap().len(), 1);
    assert_eq!(transport.calls().len(), 1);

    driver.start().unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(driver.queue().list_pending().unwrap().is_empty());
    driver.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_double_start_is_an_error() {
    let driver = simple_driver(&MockTransport::succeeding());

    driver.start().unwrap();
    assert!(matches!(driver.start(), Err(SyncError::Driver(_))));

    driver.shutdown().await.unwrap();
    // Stopping twice is harmless
    driver.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lets_in_flight_pass_finish() {
    let transport = MockTransport::succeeding().with_delay(Duration::from_millis(500));
    let driver = driver_with(
        &transport,
        AlwaysOnline,
        retry_forever(),
        Duration::from_millis(100),
    );
    driver.queue().enqueue(&patient("Ada")).unwrap();
    driver.start().unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(driver.state(), DriverState::Running);

    driver.shutdown().await.unwrap();

    assert!(driver.queue().list_pending().unwrap().is_empty());
    assert_eq!(driver.state(), DriverState::Stopped);
}

#[tokio::test]
async fn test_max_retries_dead_letters() {
    let transport = MockTransport::failing("boom");
    let config = ExecutorConfig {
        retry: RetryPolicy {
            max_retries: Some(2),
            ..RetryPolicy::unbounded()
        },
        ..ExecutorConfig::default()
    };
    let driver = driver_with(&transport, AlwaysOnline, config, Duration::from_secs(3600));
    let id = driver.queue().enqueue(&patient("Ada")).unwrap();

    assert_eq!(completed(driver.drain_once().await.unwrap()).failed, 1);
    assert_eq!(completed(driver.drain_once().await.unwrap()).dead_lettered, 1);

    assert!(driver.queue().list_pending().unwrap().is_empty());
    let op = driver.queue().get(id).unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::DeadLetter);
    assert_eq!(op.retry_count, 2);
    assert_eq!(op.last_error.as_deref(), Some("boom"));

    // Dead letters are never replayed again
    assert_eq!(completed(driver.drain_once().await.unwrap()).total(), 0);
    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test]
async fn test_backoff_defers_failed_operation() {
    let transport = MockTransport::failing("server error");
    let config = ExecutorConfig {
        retry: RetryPolicy::exponential(5, 10),
        ..ExecutorConfig::default()
    };
    let driver = driver_with(&transport, AlwaysOnline, config, Duration::from_secs(3600));
    let id = driver.queue().enqueue(&patient("Ada")).unwrap();

    driver.drain_once().await.unwrap();
    let op = driver.queue().get(id).unwrap().unwrap();
    assert!(op.next_attempt_at.is_some());

    let report = completed(driver.drain_once().await.unwrap());
    assert_eq!(report.deferred, 1);
    assert_eq!(transport.calls().len(), 1);
    assert_eq!(driver.queue().get(id).unwrap().unwrap().retry_count, 1);
}

#[tokio::test]
async fn test_unroutable_dead_letter_policy() {
    let transport = MockTransport::succeeding();
    let config = ExecutorConfig {
        unroutable: UnroutablePolicy::DeadLetter,
        ..retry_forever()
    };
    let driver = driver_with(&transport, AlwaysOnline, config, Duration::from_secs(3600));
    let id = driver
        .queue()
        .enqueue(&OperationRequest::new("unknown", "create", json!({})))
        .unwrap();

    let report = completed(driver.drain_once().await.unwrap());

    assert_eq!(report.dead_lettered, 1);
    let op = driver.queue().get(id).unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::DeadLetter);
    assert_eq!(
        op.last_error.as_deref(),
        Some("unrecognized operation tag unknown/create")
    );
}

#[tokio::test(start_paused = true)]
async fn test_partitioned_replay_keeps_per_target_order() {
    let transport = MockTransport::succeeding().with_delay(Duration::from_millis(100));
    let config = ExecutorConfig {
        max_concurrency: 4,
        ..retry_forever()
    };
    let driver = driver_with(&transport, AlwaysOnline, config, Duration::from_secs(3600));
    let queue = driver.queue();
    queue
        .enqueue(&OperationRequest::patient_update("a", json!({ "v": 1 })))
        .unwrap();
    queue
        .enqueue(&OperationRequest::patient_update("b", json!({ "v": 1 })))
        .unwrap();
    queue
        .enqueue(&OperationRequest::patient_update("a", json!({ "v": 2 })))
        .unwrap();
    queue
        .enqueue(&OperationRequest::test_create(json!({ "kind": "pcr" })))
        .unwrap();

    let report = completed(driver.drain_once().await.unwrap());

    assert_eq!(report.succeeded, 4);
    assert!(transport.max_in_flight() > 1);
    let bodies: Vec<serde_json::Value> = transport
        .calls()
        .into_iter()
        .filter(|c| c.path == "/patients/a")
        .map(|c| c.body)
        .collect();
    assert_eq!(bodies, vec![json!({ "v": 1 }), json!({ "v": 2 })]);
}

#[tokio::test]
async fn test_dry_run_mutates_nothing() {
    let transport = MockTransport::failing("server error");
    let config = ExecutorConfig {
        dry_run: true,
        unroutable: UnroutablePolicy::DeadLetter,
        ..retry_forever()
    };
    let driver = driver_with(&transport, AlwaysOnline, config, Duration::from_secs(3600));
    let id = driver.queue().enqueue(&patient("Ada")).unwrap();
    let unknown = driver
        .queue()
        .enqueue(&OperationRequest::new("unknown", "create", json!({})))
        .unwrap();

    let report = completed(driver.drain_once().await.unwrap());

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.unroutable, 1);
    assert!(matches!(
        report.results[0].outcome,
        OperationOutcome::WouldReplay { .. }
    ));
    assert!(transport.calls().is_empty());
    assert_eq!(driver.queue().get(id).unwrap().unwrap().retry_count, 0);
    assert_eq!(
        driver.queue().get(unknown).unwrap().unwrap().status,
        OperationStatus::Pending
    );
}

#[tokio::test]
async fn test_default_config_retries_every_pass_forever() {
    let transport = MockTransport::failing("server error");
    let queue = Arc::new(SyncQueue::in_memory().unwrap());
    let driver = SyncDriver::new(
        Arc::clone(&queue),
        transport.clone(),
        AlwaysOnline,
        &SyncConfig::default(),
    );
    let id = queue.enqueue(&patient("Ada")).unwrap();

    for _ in 0..12 {
        assert_eq!(completed(driver.drain_once().await.unwrap()).failed, 1);
    }

    let op = queue.get(id).unwrap().unwrap();
    assert_eq!(op.retry_count, 12);
    assert_eq!(op.status, OperationStatus::Pending);
    assert!(op.next_attempt_at.is_none());
    assert_eq!(transport.calls().len(), 12);
}

#[tokio::test]
async fn test_zero_interval_is_rejected_at_start() {
    let transport = MockTransport::succeeding();
    let driver = driver_with(&transport, AlwaysOnline, retry_forever(), Duration::ZERO);

    assert!(matches!(driver.start(), Err(SyncError::Driver(_))));
    assert_eq!(driver.state(), DriverState::Idle);
    assert!(!driver.request_sync());
    driver.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dropping_last_handle_ends_loop() {
    let transport = MockTransport::succeeding();
    let queue = Arc::new(SyncQueue::in_memory().unwrap());
    let executor = SyncExecutor::with_config(
        Arc::clone(&queue),
        transport.clone(),
        RouteTable::default(),
        retry_forever(),
    );
    let driver = SyncDriver::with_executor(executor, AlwaysOnline, Duration::from_millis(100));
    driver.start().unwrap();
    let handle = driver.clone();
    drop(driver);

    queue.enqueue(&patient("Ada")).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.calls().len(), 1);

    drop(handle);
    tokio::time::sleep(Duration::from_millis(10)).await;
    queue.enqueue(&patient("Grace")).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(transport.calls().len(), 1);
    assert_eq!(queue.list_pending().unwrap().len(), 1);
}

/// Accepts every request, but renames the queue table away on the first one
/// so the following `remove` fails.
struct TableRenamingTransport {
    database: PathBuf,
    renamed: AtomicBool,
}

impl Transport for TableRenamingTransport {
    async fn replay(&self, _request: &ReplayRequest) -> Result<(), String> {
        if !self.renamed.swap(true, Ordering::SeqCst) {
            let conn = rusqlite::Connection::open(&self.database).map_err(|e| e.to_string())?;
            conn.execute("ALTER TABLE sync_queue RENAME TO sync_queue_moved", [])
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_storage_error_mid_pass_releases_guard() {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = Paths::with_root(dir.path().join("portal"));
    let queue = Arc::new(SyncQueue::open(&paths).unwrap());
    let transport = TableRenamingTransport {
        database: paths.database.clone(),
        renamed: AtomicBool::new(false),
    };
    let executor = SyncExecutor::with_config(
        Arc::clone(&queue),
        transport,
        RouteTable::default(),
        retry_forever(),
    );
    let driver = SyncDriver::with_executor(executor, AlwaysOnline, Duration::from_secs(3600));
    let id = queue.enqueue(&patient("Ada")).unwrap();

    assert!(matches!(
        driver.drain_once().await,
        Err(SyncError::Database(_))
    ));
    assert_eq!(driver.state(), DriverState::Idle);

    rusqlite::Connection::open(&paths.database)
        .unwrap()
        .execute("ALTER TABLE sync_queue_moved RENAME TO sync_queue", [])
        .unwrap();

    let report = completed(driver.drain_once().await.unwrap());
    assert_eq!(report.succeeded, 1);
    assert!(queue.get(id).unwrap().is_none());
}
