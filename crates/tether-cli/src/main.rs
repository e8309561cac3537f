//! Entry point of the `tether` binary.
//!
//! Delegates to [`tether_cli::run`] with the process arguments and standard
//! streams.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    tether_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
