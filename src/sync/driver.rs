//! Background sync driver.
//!
//! Runs in a tokio task, draining the queue on a fixed interval, when
//! connectivity is restored, and on manual request. Every source is turned
//! into a [`Trigger`] and handled by the same loop, and a pass guard makes a
//! second concurrent drain pass impossible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::connectivity::Connectivity;
use super::executor::{DrainReport, ExecutorConfig, SyncExecutor, Transport};
use super::queue::SyncQueue;
use super::routes::RouteTable;
use crate::config::SyncConfig;
use crate::error::SyncError;

const TRIGGER_CAPACITY: usize = 8;

/// Lifecycle state of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    /// Never started; no timer registered.
    Idle,
    /// Loop running, waiting for the next trigger.
    Scheduled,
    /// A drain pass is in progress.
    Running,
    /// Stopped; timer cancelled and triggers detached.
    Stopped,
}

/// Reason a drain pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The interval timer fired.
    Tick,
    /// Connectivity went from offline to online.
    ConnectivityRestored,
    /// A caller asked for an immediate pass.
    SyncNow,
}

/// Sending half of the driver's control channel.
///
/// Sends never block. If the channel is full a pass is already pending, so
/// the trigger is dropped.
#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: mpsc::Sender<Trigger>,
}

impl TriggerSender {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Trigger>) -> Self {
        Self { tx }
    }

    /// Request a pass. Returns whether the trigger was queued.
    pub fn send(&self, trigger: Trigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(TrySendError::Full(trigger)) => {
                log::debug!("Trigger {trigger:?} coalesced with a pending one");
                false
            },
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Outcome of a drain request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The pass ran.
    Completed(DrainReport),
    /// No connectivity; no record was touched.
    Offline,
    /// Another pass holds the guard.
    AlreadyRunning,
}

/// The background sync driver.
///
/// Handles share one loop. The loop task only holds the pass state, so
/// dropping the last handle closes the stop channel and ends the loop.
pub struct SyncDriver<T, C> {
    inner: Arc<Inner<T, C>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl<T, C> Clone for SyncDriver<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

struct Inner<T, C> {
    executor: SyncExecutor<T>,
    connectivity: C,
    interval: Duration,
    pass_active: AtomicBool,
}

struct Lifecycle {
    state: DriverState,
    control: Option<LoopControl>,
}

struct LoopControl {
    stop: watch::Sender<bool>,
    triggers: TriggerSender,
    task: JoinHandle<()>,
}

/// Holds the pass flag; releasing it on drop means an error or panic inside
/// a pass cannot leave the driver wedged.
struct PassGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl<T, C> SyncDriver<T, C>
where
    T: Transport + 'static,
    C: Connectivity,
{
    /// Create a driver from the sync settings.
    #[must_use]
    pub fn new(queue: Arc<SyncQueue>, transport: T, connectivity: C, config: &SyncConfig) -> Self {
        let executor = SyncExecutor::with_config(
            queue,
            transport,
            RouteTable::new(config.routes.clone()),
            ExecutorConfig::from(config),
        );
        Self::with_executor(executor, connectivity, config.interval())
    }

    /// Create a driver around an existing executor.
    #[must_use]
    pub fn with_executor(executor: SyncExecutor<T>, connectivity: C, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                connectivity,
                interval,
                pass_active: AtomicBool::new(false),
            }),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: DriverState::Idle,
                control: None,
            })),
        }
    }

    #[must_use]
    pub fn queue(&self) -> &SyncQueue {
        self.inner.executor.queue()
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        if self.inner.pass_active.load(Ordering::Acquire) {
            return DriverState::Running;
        }
        self.lifecycle()
            .map_or(DriverState::Stopped, |lifecycle| lifecycle.state)
    }

    /// Spawn the driver loop on the current tokio runtime.
    ///
    /// The first timer tick fires one interval after start.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Driver` if the driver is already started or the
    /// interval is zero.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) -> Result<(), SyncError> {
        if self.inner.interval.is_zero() {
            return Err(SyncError::Driver(
                "Sync interval must be greater than zero".to_string(),
            ));
        }

        let mut lifecycle = self.lifecycle()?;
        if lifecycle.control.is_some() {
            return Err(SyncError::Driver("Sync driver is already running".to_string()));
        }

        let (tx, rx) = mpsc::channel(TRIGGER_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let triggers = TriggerSender::new(tx);
        self.inner.connectivity.subscribe(triggers.clone());

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.run(rx, stop_rx).await });

        lifecycle.state = DriverState::Scheduled;
        lifecycle.control = Some(LoopControl {
            stop: stop_tx,
            triggers,
            task,
        });
        Ok(())
    }

    /// Cancel the timer and detach triggers.
    ///
    /// A pass already in flight runs to completion and its queue effects
    /// still apply. Stopping a driver that is not running does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the lifecycle lock is poisoned.
    pub fn stop(&self) -> Result<(), SyncError> {
        self.halt().map(|_| ())
    }

    /// Stop and wait for the loop, including any in-flight pass, to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop task panicked.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        if let Some(task) = self.halt()? {
            task.await
                .map_err(|e| SyncError::Driver(format!("Sync driver task failed: {e}")))?;
        }
        Ok(())
    }

    fn halt(&self) -> Result<Option<JoinHandle<()>>, SyncError> {
        let control = {
            let mut lifecycle = self.lifecycle()?;
            let Some(control) = lifecycle.control.take() else {
                return Ok(None);
            };
            lifecycle.state = DriverState::Stopped;
            control
        };

        self.inner.connectivity.unsubscribe();
        // The loop may already have exited; nothing to signal then
        let _ = control.stop.send(true);
        log::info!("Sync driver stopped");
        Ok(Some(control.task))
    }

    /// Ask the running loop for an immediate pass.
    ///
    /// Returns `false` if the driver is not running or a pass request is
    /// already pending.
    #[must_use]
    pub fn request_sync(&self) -> bool {
        self.triggers()
            .is_some_and(|triggers| triggers.send(Trigger::SyncNow))
    }

    /// The control channel of the running loop, for platform glue.
    #[must_use]
    pub fn triggers(&self) -> Option<TriggerSender> {
        self.lifecycle()
            .ok()
            .and_then(|lifecycle| lifecycle.control.as_ref().map(|c| c.triggers.clone()))
    }

    /// Run one drain pass now, on the caller's task.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written.
    pub async fn drain_once(&self) -> Result<DrainOutcome, SyncError> {
        self.inner.drain().await
    }

    fn lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>, SyncError> {
        self.lifecycle
            .lock()
            .map_err(|_| SyncError::Driver("Sync driver state lock poisoned".to_string()))
    }
}

impl<T, C> Inner<T, C>
where
    T: Transport,
    C: Connectivity,
{
    async fn run(&self, mut triggers: mpsc::Receiver<Trigger>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "Sync driver started (interval: {}ms)",
            self.interval.as_millis()
        );

        loop {
            // A closed channel means every driver handle was dropped
            let trigger = tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = ticker.tick() => Trigger::Tick,
                Some(trigger) = triggers.recv() => trigger,
            };

            self.handle(trigger).await;

            // Requests made while the pass ran are satisfied by it
            while let Ok(ignored) = triggers.try_recv() {
                log::debug!("Ignoring {ignored:?} received during drain pass");
            }
            ticker.reset();
        }

        log::debug!("Sync driver loop exited");
    }

    async fn handle(&self, trigger: Trigger) {
        match self.drain().await {
            Ok(DrainOutcome::Completed(report)) => {
                if report.total() > 0 {
                    log::info!(
                        "Drain pass ({trigger:?}): {} replayed, {} failed, {} dead-lettered, {} deferred, {} unroutable",
                        report.succeeded,
                        report.failed,
                        report.dead_lettered,
                        report.deferred,
                        report.unroutable
                    );
                }
            },
            Ok(DrainOutcome::Offline) => {
                log::debug!("Offline, skipping drain pass ({trigger:?})");
            },
            Ok(DrainOutcome::AlreadyRunning) => {
                log::debug!("Drain pass already running, ignoring {trigger:?}");
            },
            Err(e) => {
                log::warn!("Drain pass aborted: {e}");
            },
        }
    }

    async fn drain(&self) -> Result<DrainOutcome, SyncError> {
        let Some(_guard) = PassGuard::acquire(&self.pass_active) else {
            return Ok(DrainOutcome::AlreadyRunning);
        };

        if !self.connectivity.is_online() {
            return Ok(DrainOutcome::Offline);
        }

        self.executor.execute_all().await.map(DrainOutcome::Completed)
    }
}
