//! Configuration settings for portal-sync.
//!
//! Settings are loaded from `config.yaml` in the data directory. Every field
//! has a default, so a partial file (or no file at all) is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::args::OutputFormat;
use crate::config::Paths;
use crate::error::SyncError;
use crate::sync::retry::RetryPolicy;
use crate::sync::routes::{default_routes, Route, UnroutablePolicy};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Remote API settings.
    pub remote: RemoteConfig,
    /// Sync driver settings.
    pub sync: SyncConfig,
    /// Connectivity monitoring settings.
    pub connectivity: ConnectivityConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default output format.
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL every route path is appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Total timeout for one replay request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Timeout for establishing a connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Sync driver settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Polling interval in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Maximum number of target partitions replayed at once. 1 means strictly
    /// sequential replay in queue order.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// What to do with operations whose tag matches no route.
    #[serde(default)]
    pub unroutable: UnroutablePolicy,
    /// Backoff and retry ceiling.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Route table mapping operation tags to endpoints.
    #[serde(default = "default_routes")]
    pub routes: Vec<Route>,
}

/// Connectivity monitoring settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Whether the daemon probes the remote API to detect connectivity.
    #[serde(default = "default_true")]
    pub probe_enabled: bool,
    /// Seconds between probes.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// Path (relative to the base URL) requested by the probe.
    #[serde(default)]
    pub probe_path: String,
}

// Default value functions for serde
const fn default_output_format() -> OutputFormat {
    OutputFormat::Pretty
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_connect_timeout() -> u64 {
    10
}

const fn default_interval_ms() -> u64 {
    5000
}

const fn default_max_concurrency() -> usize {
    1
}

const fn default_true() -> bool {
    true
}

const fn default_probe_interval() -> u64 {
    10
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: default_output_format(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_concurrency: default_max_concurrency(),
            unroutable: UnroutablePolicy::default(),
            retry: RetryPolicy::default(),
            routes: default_routes(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_enabled: default_true(),
            probe_interval_secs: default_probe_interval(),
            probe_path: String::new(),
        }
    }
}

impl RemoteConfig {
    /// Request timeout as a duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Connect timeout as a duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl SyncConfig {
    /// Polling interval as a duration.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ConnectivityConfig {
    /// Probe interval as a duration.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

impl Config {
    /// Load configuration from the given data directory.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation.
    pub fn load(paths: &Paths) -> Result<Self, SyncError> {
        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), SyncError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Render the effective configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, SyncError> {
        serde_yaml::to_string(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Check values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.sync.interval_ms == 0 {
            return Err(SyncError::Config(
                "sync.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.sync.max_concurrency == 0 {
            return Err(SyncError::Config(
                "sync.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.connectivity.probe_enabled && self.connectivity.probe_interval_secs == 0 {
            return Err(SyncError::Config(
                "connectivity.probe_interval_secs must be greater than zero".to_string(),
            ));
        }
        reqwest::Url::parse(&self.remote.base_url).map_err(|e| {
            SyncError::Config(format!(
                "remote.base_url '{}' is not a valid URL: {e}",
                self.remote.base_url
            ))
        })?;
        for route in &self.sync.routes {
            if !route.path.starts_with('/') {
                return Err(SyncError::Config(format!(
                    "route {}/{} path '{}' must start with '/'",
                    route.entity, route.operation_type, route.path
                )));
            }
        }
        Ok(())
    }
}
