//! Command-line interface for portal-sync.

pub mod args;
pub mod commands;
