use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};

use crate::config::HOME_ENV;

#[derive(Parser)]
#[command(name = "portal-sync")]
#[command(about = "Offline-first sync queue for the patient portal API")]
#[command(long_about = "portal-sync - Offline-first sync queue for the patient portal API

Records patient and test mutations in a durable local queue while the
network is unavailable, and replays them in order against the portal REST
API once it is reachable again.

QUICK START:
  portal-sync enqueue patient create --payload '{\"firstName\":\"Ada\"}'
  portal-sync status              Show queue counts
  portal-sync run                 Run one drain pass now
  portal-sync daemon              Drain continuously in the background

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

For more information on a specific command, run:
  portal-sync <command> --help")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Use 'pretty' for human-readable colored output, or 'json' for
    /// machine-readable output. Defaults to `general.default_output` from
    /// the config file.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Directory holding the queue database and config file
    #[arg(long, global = true, env = HOME_ENV, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue an operation for later replay
    ///
    /// The operation is stored durably and replayed by `run` or `daemon`.
    /// Tags that match no route are accepted and only reported at replay.
    ///
    /// # Examples
    ///
    ///   portal-sync enqueue patient create --payload '{"firstName":"Ada"}'
    ///   portal-sync enqueue patient update --id p-42 --payload '{"age":41}'
    ///   portal-sync enqueue test create --payload '{"kind":"pcr"}'
    #[command(alias = "add")]
    Enqueue {
        /// Entity kind (patient, test, ...)
        entity: String,

        /// Operation kind (create, update, ...)
        #[arg(value_name = "TYPE")]
        operation_type: String,

        /// Target identifier, required for updates
        #[arg(long, short = 'i')]
        id: Option<String>,

        /// JSON body sent to the remote endpoint
        #[arg(long, short = 'p', default_value = "{}")]
        payload: String,
    },

    /// Show queue status
    ///
    /// Displays pending and dead-lettered counts and the oldest pending
    /// operation.
    Status,

    /// List queued operations
    #[command(alias = "ls")]
    List {
        /// Filter by status (pending, dead_letter)
        #[arg(long, short = 's', default_value = "pending")]
        status: String,

        /// Maximum operations to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Run one drain pass now
    ///
    /// Replays every pending operation against the remote API in queue
    /// order. Successes are removed, failures recorded on the operation.
    Run {
        /// Resolve routes and show what would be sent, without sending
        #[arg(long)]
        dry_run: bool,
    },

    /// Drain the queue continuously until interrupted
    ///
    /// Runs a pass every `sync.interval_ms`, and immediately when the
    /// connectivity probe sees the API come back.
    Daemon,

    /// Move dead-lettered operations back to pending
    Retry {
        /// Requeue every dead-lettered operation
        #[arg(long, conflicts_with = "id")]
        all: bool,

        /// Specific operation ID to requeue
        id: Option<i64>,
    },

    /// Remove one operation from the queue
    #[command(alias = "rm")]
    Remove {
        /// Operation ID
        id: i64,
    },

    /// Clear operations from the queue
    Clear {
        /// Remove dead-lettered operations only
        #[arg(long, conflicts_with = "all")]
        dead_letters: bool,

        /// Remove every operation, pending included
        #[arg(long)]
        all: bool,

        /// Required with --all
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Show the effective configuration
    Config,

    /// Generate shell completions
    ///
    /// # Examples
    ///
    ///   portal-sync completions bash > /usr/local/etc/bash_completion.d/portal-sync
    ///   portal-sync completions zsh > ~/.zsh/completions/_portal-sync
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}
