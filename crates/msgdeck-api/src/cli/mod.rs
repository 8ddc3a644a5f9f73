//! CLI command definitions for the `mdeck` binary.
//!
//! Uses clap derive macros. Most operational work happens over the REST API
//! started by `mdeck serve`; the CLI covers setup and inspection.

pub mod account;
pub mod status;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run and manage the multi-account messaging dashboard.
#[derive(Parser)]
#[command(name = "mdeck", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit structured JSON logs.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST/WebSocket API server.
    Serve {
        /// Port to listen on (defaults to `[server] port`).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (defaults to `[server] host`).
        #[arg(long)]
        host: Option<String>,
    },

    /// System status dashboard.
    Status,

    /// Manage registered accounts.
    Account {
        #[command(subcommand)]
        action: account::AccountCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
