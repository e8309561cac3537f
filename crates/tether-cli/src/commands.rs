//! Execution of the CLI subcommands against a live worker.

use std::io::Write;
use std::time::Duration;

use serde_json::Value;
use tether_host::{ChannelEvent, ProcessSupervisor};
use tether_protocol::RequestMethod;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};
use tracing::{info, warn};

use crate::CLI_TARGET;
use crate::errors::AppError;

/// Sends one request and prints the result. The worker is disposed of
/// whatever the outcome.
pub(crate) async fn call<W: Write>(
    supervisor: &ProcessSupervisor,
    method: &str,
    params: &str,
    stdout: &mut W,
) -> Result<(), AppError> {
    let request_method: RequestMethod = method.parse().map_err(|_| AppError::UnknownMethod {
        method: method.to_owned(),
    })?;
    let request_params: Value = serde_json::from_str(params).map_err(AppError::InvalidParams)?;

    let outcome = supervisor.send_request(request_method, request_params).await;
    supervisor.dispose().await;

    let result = outcome?;
    let rendered = serde_json::to_string_pretty(&result).map_err(AppError::RenderResult)?;
    writeln!(stdout, "{rendered}").map_err(AppError::Output)
}

/// Logs channel events until `seconds` have passed, then disposes.
pub(crate) async fn watch(supervisor: &ProcessSupervisor, seconds: u64) -> Result<(), AppError> {
    let mut events = supervisor.subscribe();
    let deadline = Instant::now() + Duration::from_secs(seconds);

    if let Err(err) = supervisor.initialize().await {
        supervisor.dispose().await;
        return Err(err.into());
    }
    info!(target: CLI_TARGET, pid = ?supervisor.pid(), seconds, "watching worker");

    loop {
        tokio::select! {
            () = time::sleep_until(deadline) => break,
            received = events.recv() => match received {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: CLI_TARGET, skipped, "missed channel events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    supervisor.dispose().await;
    Ok(())
}

fn log_event(event: &ChannelEvent) {
    match event {
        ChannelEvent::Notification(notification) => info!(
            target: CLI_TARGET,
            kind = %notification.kind(),
            params = %notification.params(),
            "worker notification"
        ),
        other => info!(target: CLI_TARGET, event = ?other, "channel event"),
    }
}
