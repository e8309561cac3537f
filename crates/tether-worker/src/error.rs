//! Errors raised by the worker runtime.

use std::io;
use std::sync::Arc;

use tether_protocol::ProtocolError;
use thiserror::Error;

/// Failures that stop [`crate::WorkerRuntime::serve`].
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// Reading requests failed.
    #[error("failed to read requests: {0}")]
    Read(#[source] ProtocolError),

    /// Writing responses or notifications failed.
    #[error("failed to write to the host: {0}")]
    Write(#[source] Arc<io::Error>),

    /// A message could not be encoded.
    #[error(transparent)]
    Encode(#[from] ProtocolError),

    /// The output queue closed while the runtime was still serving.
    #[error("worker output closed")]
    OutputClosed,
}
