//! Error type of the CLI runtime.

use std::io;
use std::sync::Arc;

use tether_host::ChannelError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to start the async runtime: {0}")]
    Runtime(io::Error),
    #[error("unknown method '{method}'")]
    UnknownMethod { method: String },
    #[error("invalid params: {0}")]
    InvalidParams(serde_json::Error),
    #[error("failed to render the result: {0}")]
    RenderResult(serde_json::Error),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("failed to write output: {0}")]
    Output(io::Error),
}
