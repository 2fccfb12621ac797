//! Command implementations for portal-sync.
//!
//! Each command returns the text to print, already formatted for the
//! selected output format.

mod completions;
mod config;
mod daemon;
mod queue;
mod run;

pub use completions::completions;
pub use config::show_config;
pub use daemon::daemon;
pub use queue::{clear, enqueue, list, remove, retry, status};
pub use run::run;
