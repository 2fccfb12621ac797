//! Network connectivity signal for the sync driver.
//!
//! The driver asks a [`Connectivity`] source whether the device is online
//! before each drain pass, and subscribes to it so that an offline → online
//! transition triggers an immediate pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::driver::{Trigger, TriggerSender};
use crate::api::{ApiClient, ProbeResult};

/// Source of the online/offline signal.
pub trait Connectivity: Send + Sync + 'static {
    /// Whether the network is currently available.
    fn is_online(&self) -> bool;

    /// Register the driver's trigger channel for restoration events.
    fn subscribe(&self, _listener: TriggerSender) {}

    /// Detach the driver's trigger channel.
    fn unsubscribe(&self) {}
}

/// Connectivity source that is always online.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Shared online flag set by platform glue or by a [`NetworkMonitor`].
#[derive(Debug, Clone)]
pub struct ConnectivityFlag {
    inner: Arc<FlagInner>,
}

#[derive(Debug)]
struct FlagInner {
    online: AtomicBool,
    listener: Mutex<Option<TriggerSender>>,
}

impl ConnectivityFlag {
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            inner: Arc::new(FlagInner {
                online: AtomicBool::new(online),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Record the current state. Returns `true` if the state changed.
    ///
    /// Going from offline to online notifies the subscribed driver.
    pub fn set_online(&self, online: bool) -> bool {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return false;
        }

        if online {
            log::info!("Connectivity restored");
            if let Ok(listener) = self.inner.listener.lock() {
                if let Some(listener) = listener.as_ref() {
                    listener.send(Trigger::ConnectivityRestored);
                }
            }
        } else {
            log::info!("Network appears offline, pausing sync");
        }
        true
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: TriggerSender) {
        if let Ok(mut slot) = self.inner.listener.lock() {
            *slot = Some(listener);
        }
    }

    fn unsubscribe(&self) {
        if let Ok(mut slot) = self.inner.listener.lock() {
            *slot = None;
        }
    }
}

/// Periodically probes the remote API and updates a [`ConnectivityFlag`].
pub struct NetworkMonitor {
    client: ApiClient,
    flag: ConnectivityFlag,
    interval: Duration,
    probe_path: String,
}

impl NetworkMonitor {
    #[must_use]
    pub fn new(
        client: ApiClient,
        flag: ConnectivityFlag,
        interval: Duration,
        probe_path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            flag,
            interval,
            probe_path: probe_path.into(),
        }
    }

    /// Probe once and update the flag. Returns whether the API is reachable.
    pub async fn check(&self) -> bool {
        let online = self.client.probe(&self.probe_path).await == ProbeResult::Reachable;
        self.flag.set_online(online);
        online
    }

    /// Run the probe loop on the tokio runtime until the task is aborted.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.check().await;
            }
        })
    }
}
