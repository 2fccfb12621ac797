//! Error types for portal-sync.

use thiserror::Error;

/// Errors raised by the queue, the sync driver, and the CLI.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local queue database failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration could not be read, parsed, or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote API could not be reached or rejected a request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A queued operation or other item does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The sync driver was used in an invalid lifecycle state.
    #[error("Sync driver error: {0}")]
    Driver(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl SyncError {
    /// Exit code the CLI uses for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::NotFound(_) => 3,
            Self::Http(_) => 4,
            Self::Database(_) | Self::Driver(_) | Self::Io(_) | Self::Parse(_) => 1,
        }
    }
}
