//! Config command implementation.

use colored::Colorize;

use crate::cli::args::OutputFormat;
use crate::config::{Config, Paths};
use crate::error::SyncError;
use crate::output::to_json;

/// Show the effective configuration and where it was loaded from.
///
/// # Errors
///
/// Returns an error if the configuration cannot be serialized.
pub fn show_config(
    config: &Config,
    paths: &Paths,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Json => to_json(&serde_json::json!({
            "data_dir": paths.root,
            "config_file": paths.config_file,
            "config_file_exists": paths.config_file.exists(),
            "database": paths.database,
            "config": config,
        })),
        OutputFormat::Pretty => {
            let source = if paths.config_file.exists() {
                paths.config_file.display().to_string()
            } else {
                format!("{} (not found, using defaults)", paths.config_file.display())
            };

            let mut lines = vec![
                "Configuration".bold().to_string(),
                "─".repeat(40),
                format!("  Data dir:  {}", paths.root.display()),
                format!("  Config:    {}", source.dimmed()),
                format!("  Database:  {}", paths.database.display()),
                String::new(),
            ];
            lines.push(config.to_yaml()?.trim_end().to_string());
            Ok(lines.join("\n"))
        },
    }
}
