//! Connection state machine states.

use serde::Serialize;
use strum::{Display, IntoStaticStr};

/// Protocol-level state of the worker connection.
///
/// Transitions follow `disconnected → connecting → connected →
/// {disconnected, error}` with `error → connecting` on a reconnect attempt.
/// Only [`ConnectionState::Connected`] permits ordinary requests.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// No worker is attached.
    #[default]
    Disconnected,
    /// A worker is starting or being reconnected.
    Connecting,
    /// The handshake succeeded and requests may flow.
    Connected,
    /// Heartbeat failure, failed handshake or exhausted reconnects.
    Error,
}

impl ConnectionState {
    /// Returns `true` when requests may be sent.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}
