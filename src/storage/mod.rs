//! Storage layer for portal-sync.
//!
//! SQLite-based persistence for the offline operation queue.

mod database;
mod migrations;

pub use database::Database;
pub use migrations::CURRENT_VERSION;
