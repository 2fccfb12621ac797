//! One-shot drain pass.

use std::sync::Arc;

use crate::api::ApiClient;
use crate::cli::args::OutputFormat;
use crate::config::Config;
use crate::error::SyncError;
use crate::output::format_drain_report;
use crate::sync::{
    ConnectivityFlag, DrainOutcome, ExecutorConfig, NetworkMonitor, RouteTable, SyncDriver,
    SyncExecutor, SyncQueue,
};

/// Run one drain pass against the configured remote API.
///
/// The API is probed first unless probing is disabled or this is a dry run.
///
/// # Errors
///
/// Returns `SyncError::Http` if the API is unreachable, or an error if the
/// queue cannot be read or written.
pub async fn run(
    queue: Arc<SyncQueue>,
    config: &Config,
    dry_run: bool,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let client = ApiClient::new(&config.remote)?;
    let flag = ConnectivityFlag::new(true);
    if config.connectivity.probe_enabled && !dry_run {
        NetworkMonitor::new(
            client.clone(),
            flag.clone(),
            config.connectivity.probe_interval(),
            config.connectivity.probe_path.clone(),
        )
        .check()
        .await;
    }

    let executor = SyncExecutor::with_config(
        queue,
        client.clone(),
        RouteTable::new(config.sync.routes.clone()),
        ExecutorConfig {
            dry_run,
            ..ExecutorConfig::from(&config.sync)
        },
    );
    let driver = SyncDriver::with_executor(executor, flag, config.sync.interval());

    match driver.drain_once().await? {
        DrainOutcome::Completed(report) => format_drain_report(&report, dry_run, format),
        DrainOutcome::Offline => Err(SyncError::Http(format!(
            "Remote API at {} is unreachable; nothing was replayed",
            client.base_url()
        ))),
        DrainOutcome::AlreadyRunning => Err(SyncError::Driver(
            "A drain pass is already running".to_string(),
        )),
    }
}
