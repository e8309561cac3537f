//! Events published to collaborators over the broadcast bus.

use std::time::Duration;

use serde_json::Value;
use tether_protocol::NotificationMethod;

use crate::state::ConnectionState;

/// Capacity of the event bus; slow subscribers observe `Lagged`.
pub(crate) const EVENT_CAPACITY: usize = 256;

/// A typed notification pushed by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerNotification {
    kind: NotificationMethod,
    params: Value,
    timestamp: Option<u64>,
}

impl WorkerNotification {
    pub(crate) const fn new(kind: NotificationMethod, params: Value, timestamp: Option<u64>) -> Self {
        Self {
            kind,
            params,
            timestamp,
        }
    }

    /// Which of the known notifications this is.
    #[must_use]
    pub const fn kind(&self) -> NotificationMethod {
        self.kind
    }

    /// Opaque payload.
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// Worker-side send time, when the worker stamped one.
    #[must_use]
    pub const fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }
}

/// Everything a collaborator can observe about the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The handshake succeeded.
    Connected,
    /// The connection dropped.
    Disconnected,
    /// Any state transition.
    StateChanged(ConnectionState),
    /// A heartbeat health check failed; the connection is now in error.
    HeartbeatFailed {
        /// Description of the failure.
        reason: String,
    },
    /// A reconnect attempt is about to re-spawn the worker.
    ReconnectAttempt {
        /// One-based attempt number.
        attempt: u32,
    },
    /// Reconnecting stopped for this session.
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// The worker process exited without being asked to.
    WorkerExited {
        /// Exit code, or `None` when terminated by a signal.
        code: Option<i32>,
        /// How long the process ran.
        uptime: Duration,
    },
    /// A notification from the worker.
    Notification(WorkerNotification),
}
