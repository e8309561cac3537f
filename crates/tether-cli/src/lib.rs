//! Command-line runtime for the Tether worker channel.
//!
//! `tether call <method>` starts the worker, sends one request and prints the
//! JSON result; `tether watch` starts it and logs channel events. Both load
//! [`tether_config::Config`] from files, `TETHER_*` variables and leading
//! configuration flags before doing anything else.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use tether_config::Config;
use tether_host::ProcessSupervisor;

mod args;
mod cli;
mod commands;
mod errors;
pub mod telemetry;

use args::split_arguments;
use cli::{Cli, CliCommand};
use errors::AppError;

/// Log target for CLI activity.
pub const CLI_TARGET: &str = "tether_cli";

/// Runs the CLI with explicit arguments and output streams.
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let parts = split_arguments(args);
    let cli = match Cli::try_parse_from(parts.command) {
        Ok(cli) => cli,
        Err(err) => {
            let rendered = err.render().to_string();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    let _ = write!(stdout, "{rendered}");
                    ExitCode::SUCCESS
                }
                _ => {
                    let _ = write!(stderr, "{rendered}");
                    ExitCode::FAILURE
                }
            };
        }
    };

    match execute(cli.command, parts.config, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "tether: {error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<W: Write>(
    command: CliCommand,
    config_args: Vec<OsString>,
    stdout: &mut W,
) -> Result<(), AppError> {
    let config = Config::load_from_args(config_args).map_err(AppError::LoadConfiguration)?;
    telemetry::initialise(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;
    let supervisor = ProcessSupervisor::new(config);

    runtime.block_on(async {
        match command {
            CliCommand::Call { method, params } => {
                commands::call(&supervisor, &method, &params, stdout).await
            }
            CliCommand::Watch { seconds } => commands::watch(&supervisor, seconds).await,
        }
    })
}
