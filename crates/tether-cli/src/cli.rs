//! Command-line interface definition.

use clap::{Parser, Subcommand};

/// Drives the Tether worker channel from a terminal.
#[derive(Parser, Debug)]
#[command(name = "tether", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum CliCommand {
    /// Starts the worker, sends one request and prints its result.
    Call {
        /// Request method, for example `list_tasks`.
        method: String,
        /// JSON parameters for the request.
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Starts the worker and logs every channel event for a while.
    Watch {
        /// How long to watch before shutting the worker down.
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}
