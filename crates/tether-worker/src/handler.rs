//! The seam between the runtime and the worker's own logic.

use async_trait::async_trait;
use serde_json::Value;
use tether_protocol::{Message, Notification, NotificationMethod, RequestMethod, encode_line};
use tokio::sync::mpsc;

use crate::error::WorkerError;

/// Handles every request the runtime does not answer itself.
///
/// The runtime answers `health_check` and `shutdown` directly and refuses
/// method names it does not recognise, so implementations only see the
/// remaining operations.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produces the result for one request, or the error text the host
    /// should surface to its caller.
    async fn handle(
        &self,
        method: RequestMethod,
        params: Value,
        notifier: &Notifier,
    ) -> Result<Value, String>;
}

/// Cloneable handle for pushing notifications to the host.
///
/// Every line goes through the runtime's single writer, so notifications
/// and responses never interleave mid-line.
#[derive(Debug, Clone)]
pub struct Notifier {
    output: mpsc::UnboundedSender<String>,
}

impl Notifier {
    /// Creates a notifier that queues encoded lines on `output`.
    ///
    /// The runtime builds its own; this is for exercising handlers directly.
    #[must_use]
    pub const fn new(output: mpsc::UnboundedSender<String>) -> Self {
        Self { output }
    }

    /// Queues a notification for the host.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::OutputClosed`] once the runtime has stopped
    /// writing, or an encoding error for unserialisable parameters.
    pub fn notify(&self, method: NotificationMethod, params: Value) -> Result<(), WorkerError> {
        let message = Message::from(Notification::new(method, params));
        self.send(&message)
    }

    pub(crate) fn send(&self, message: &Message) -> Result<(), WorkerError> {
        let line = encode_line(message)?;
        self.output
            .send(line)
            .map_err(|_| WorkerError::OutputClosed)
    }
}
