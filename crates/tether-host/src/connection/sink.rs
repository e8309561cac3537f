//! Outbound side of the connection.

use tokio::sync::mpsc;

use crate::error::ChannelError;

/// Destination for encoded request lines.
///
/// The supervisor attaches a sink backed by the worker's stdin; tests attach
/// recording or mocked sinks.
pub trait WorkerSink: Send + Sync {
    /// Queues one newline-terminated line for the worker.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ChannelClosed`] when the worker can no longer
    /// receive input.
    fn send_line(&self, line: String) -> Result<(), ChannelError>;
}

/// Sink feeding a writer task through an unbounded queue.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    /// Wraps the sending half of a writer queue.
    #[must_use]
    pub const fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self { sender }
    }
}

impl WorkerSink for ChannelSink {
    fn send_line(&self, line: String) -> Result<(), ChannelError> {
        self.sender
            .send(line)
            .map_err(|_| ChannelError::ChannelClosed)
    }
}
