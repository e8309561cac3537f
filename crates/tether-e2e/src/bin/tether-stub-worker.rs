//! Scriptable worker used by the end-to-end tests.
//!
//! Usage: `tether-stub-worker <plan.json>`. Requests arrive on stdin,
//! responses leave on stdout, diagnostics go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use tether_e2e::{STUB_TARGET, StubPlan, run};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("info"))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();

    let Some(plan_path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        error!(target: STUB_TARGET, "usage: tether-stub-worker <plan.json>");
        return ExitCode::from(2);
    };
    let plan = match StubPlan::load(&plan_path) {
        Ok(plan) => plan,
        Err(err) => {
            error!(target: STUB_TARGET, error = %err, "cannot start stub worker");
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(target: STUB_TARGET, error = %err, "failed to build runtime");
            return ExitCode::FAILURE;
        }
    };
    let served = runtime.block_on(run(plan));
    // Stdin reads block a runtime thread and cannot be cancelled.
    runtime.shutdown_background();

    match served {
        Ok(outcome) => {
            info!(target: STUB_TARGET, ?outcome, "stub worker finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(target: STUB_TARGET, error = %err, "stub worker failed");
            ExitCode::FAILURE
        }
    }
}
