//! portal-sync - Offline-first sync queue for a patient portal API
//!
//! This crate records mutations against the portal's REST API in a durable
//! local queue while the device is offline, and replays them in order once
//! the network is reachable again.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod output;
pub mod storage;
pub mod sync;

pub use api::ApiClient;
pub use cli::args::{Cli, Commands, OutputFormat};
pub use error::SyncError;
pub use sync::{OperationRequest, SyncDriver, SyncQueue};
