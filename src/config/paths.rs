//! Path resolution for portal-sync configuration and data files.
//!
//! All data is stored in one directory, `~/.portal-sync/` by default:
//! - `config.yaml` - Main configuration file
//! - `queue.db` - SQLite database holding the offline operation queue
//!
//! The directory can be moved with `--data-dir` or `PORTAL_SYNC_HOME`.

use std::path::{Path, PathBuf};

use crate::error::SyncError;

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "PORTAL_SYNC_HOME";

/// Paths to portal-sync configuration and data files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Root directory: `~/.portal-sync/`
    pub root: PathBuf,
    /// Config file: `~/.portal-sync/config.yaml`
    pub config_file: PathBuf,
    /// Queue database: `~/.portal-sync/queue.db`
    pub database: PathBuf,
}

impl Paths {
    /// Create paths based on `PORTAL_SYNC_HOME`, falling back to the user's
    /// home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if neither variable is set.
    pub fn new() -> Result<Self, SyncError> {
        if let Ok(dir) = std::env::var(HOME_ENV) {
            if !dir.is_empty() {
                return Ok(Self::with_root(PathBuf::from(dir)));
            }
        }

        let home = std::env::var("HOME").map_err(|_| {
            SyncError::Config("Could not determine home directory".to_string())
        })?;

        Ok(Self::with_root(PathBuf::from(home).join(".portal-sync")))
    }

    /// Resolve paths from an explicit directory if one was given.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory was given and the default cannot be
    /// determined.
    pub fn resolve(data_dir: Option<&Path>) -> Result<Self, SyncError> {
        match data_dir {
            Some(dir) => Ok(Self::with_root(dir.to_path_buf())),
            None => Self::new(),
        }
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("queue.db"),
            root,
        }
    }

    /// Ensure the root directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), SyncError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                SyncError::Config(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }
        Ok(())
    }
}
