//! Long-running sync daemon.

use std::sync::Arc;

use crate::api::ApiClient;
use crate::cli::args::OutputFormat;
use crate::config::Config;
use crate::error::SyncError;
use crate::output::format_stats;
use crate::sync::{ConnectivityFlag, NetworkMonitor, SyncDriver, SyncQueue};

/// Drain the queue in the background until Ctrl-C.
///
/// Returns the queue status at shutdown.
///
/// # Errors
///
/// Returns an error if the driver cannot start or the signal handler cannot
/// be installed.
pub async fn daemon(
    queue: Arc<SyncQueue>,
    config: &Config,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let client = ApiClient::new(&config.remote)?;
    let flag = ConnectivityFlag::new(true);

    let monitor = if config.connectivity.probe_enabled {
        let monitor = NetworkMonitor::new(
            client.clone(),
            flag.clone(),
            config.connectivity.probe_interval(),
            config.connectivity.probe_path.clone(),
        );
        monitor.check().await;
        Some(monitor.spawn())
    } else {
        None
    };

    let driver = SyncDriver::new(Arc::clone(&queue), client, flag, &config.sync);
    driver.start()?;
    log::info!(
        "Syncing {} pending operations to {}",
        queue.stats()?.pending,
        config.remote.base_url
    );
    let _ = driver.request_sync();

    let signal = tokio::signal::ctrl_c().await;
    log::info!("Shutting down");

    if let Some(monitor) = monitor {
        monitor.abort();
    }
    driver.shutdown().await?;
    signal?;

    format_stats(&queue.stats()?, format)
}
