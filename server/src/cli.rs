//! # CLI Interface
//!
//! Defines the command-line argument structure for `tally-server` using
//! `clap` derive. Supports three subcommands: `run`, `init`, and
//! `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tally household points server.
///
/// Serves the points ledger over a REST API: kid balances, activity
/// tags, the transaction feed, and shared-secret authentication with
/// long-lived device sessions. Prometheus metrics are exposed on a
/// separate port.
#[derive(Parser, Debug)]
#[command(
    name = "tally-server",
    about = "Tally household points server",
    version,
    propagate_version = true
)]
pub struct TallyCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the tally-server binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server.
    Run(RunArgs),
    /// Initialize a data directory and seed the default kids and tags.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the data directory where the ledger database lives.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "TALLY_DATA_DIR", default_value = "tally-data")]
    pub data_dir: PathBuf,

    /// Port for the REST API.
    #[arg(long, env = "TALLY_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "TALLY_METRICS_PORT", default_value_t = 9100)]
    pub metrics_port: u16,

    /// Shared admin secret guarding all mutating requests.
    ///
    /// **Change this in any real deployment** — the default exists so a
    /// first `run` works out of the box.
    #[arg(long, env = "TALLY_SECRET", default_value = "parent123")]
    pub secret: String,

    /// Floor balances at zero instead of letting them go negative.
    #[arg(long, env = "TALLY_CLAMP_AT_ZERO", default_value_t = false)]
    pub clamp_at_zero: bool,

    /// Delete a kid's transaction history when the kid is deleted,
    /// instead of retaining it as orphaned entries.
    #[arg(long, env = "TALLY_CASCADE_HISTORY", default_value_t = false)]
    pub cascade_history: bool,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "TALLY_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "TALLY_DATA_DIR", default_value = "tally-data")]
    pub data_dir: PathBuf,
}
