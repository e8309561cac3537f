//! Errors surfaced by the worker channel.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tether_config::WorkerLaunchError;
use tether_protocol::ProtocolError;
use thiserror::Error;

use crate::state::ConnectionState;

/// Errors returned by the registry, connection manager and supervisor.
///
/// The type is `Clone` because one failure (a reset, a shutdown) is fanned
/// out to every pending request.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// A request was issued while the connection was not established.
    #[error("worker is not connected (state: {state})")]
    NotConnected {
        /// State observed when the request was rejected.
        state: ConnectionState,
    },

    /// No response arrived before the request deadline.
    #[error("request '{method}' ({id}) timed out after {}ms", timeout.as_millis())]
    RequestTimeout {
        /// Correlation id of the request.
        id: String,
        /// Method name of the request.
        method: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The worker answered with an error string.
    #[error("worker failed request '{method}' ({id}): {message}")]
    WorkerReported {
        /// Correlation id of the request.
        id: String,
        /// Method name of the request.
        method: String,
        /// Error text written by the worker.
        message: String,
    },

    /// The handshake did not succeed within its budget.
    #[error("worker did not answer the handshake within {}ms", timeout.as_millis())]
    InitializationTimeout {
        /// Handshake budget that elapsed.
        timeout: Duration,
    },

    /// A previous handshake failed; lazy start is blocked until restart.
    #[error("worker initialisation failed earlier; restart the worker to retry")]
    InitializationBlocked,

    /// The worker launch parameters could not be resolved.
    #[error("invalid worker launch configuration: {message}")]
    InvalidLaunch {
        /// Description of the launch problem.
        message: String,
    },

    /// The worker executable does not exist.
    #[error("worker executable not found: {command}")]
    BinaryNotFound {
        /// Command that could not be found.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Spawning the worker failed for another reason.
    #[error("failed to spawn worker: {message}")]
    SpawnFailed {
        /// Description of the failure.
        message: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The worker exited before it could serve the operation.
    #[error("worker process exited (code: {code:?})")]
    WorkerExited {
        /// Exit code, or `None` when terminated by a signal.
        code: Option<i32>,
    },

    /// The connection was reset while the request was pending.
    #[error("worker connection was reset")]
    ConnectionReset,

    /// The worker is being shut down.
    #[error("worker is shutting down")]
    ShutdownInProgress,

    /// A request with the same id is already pending.
    #[error("request id '{id}' is already pending")]
    DuplicateId {
        /// The conflicting id.
        id: String,
    },

    /// The consecutive reconnect budget is spent.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectLimitExceeded {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The worker's input channel or a response channel closed.
    #[error("worker channel closed")]
    ChannelClosed,

    /// A message could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] ProtocolError),
}

impl ChannelError {
    /// Maps a spawn failure, distinguishing a missing executable.
    pub(crate) fn from_spawn(command: &str, error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::NotFound {
            Self::BinaryNotFound {
                command: command.to_owned(),
                source: Arc::new(error),
            }
        } else {
            Self::SpawnFailed {
                message: format!("failed to start {command}"),
                source: Arc::new(error),
            }
        }
    }

    /// Builds a spawn failure for a missing standard stream.
    pub(crate) fn missing_pipe(stream: &'static str) -> Self {
        Self::SpawnFailed {
            message: format!("failed to capture worker {stream}"),
            source: Arc::new(io::Error::other(format!("no {stream}"))),
        }
    }
}

impl From<WorkerLaunchError> for ChannelError {
    fn from(error: WorkerLaunchError) -> Self {
        Self::InvalidLaunch {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn missing_executable_maps_to_binary_not_found() {
        let error = ChannelError::from_spawn(
            "python9",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );

        assert!(matches!(error, ChannelError::BinaryNotFound { ref command, .. } if command == "python9"));
    }

    #[rstest]
    fn other_spawn_errors_map_to_spawn_failed() {
        let error = ChannelError::from_spawn(
            "python",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );

        assert!(matches!(error, ChannelError::SpawnFailed { .. }));
    }

    #[rstest]
    fn timeout_message_names_method_and_id() {
        let error = ChannelError::RequestTimeout {
            id: String::from("req_1_2"),
            method: String::from("list_tasks"),
            timeout: Duration::from_millis(250),
        };

        assert_eq!(
            error.to_string(),
            "request 'list_tasks' (req_1_2) timed out after 250ms"
        );
    }
}
