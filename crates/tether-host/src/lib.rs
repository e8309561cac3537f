//! Host side of the Tether worker channel.
//!
//! The crate owns one long-lived worker process per session and speaks to
//! it over newline-delimited JSON:
//!
//! - [`RequestRegistry`] correlates in-flight requests with their outcome
//!   and enforces per-request deadlines.
//! - [`ConnectionManager`] owns the connection state machine, routes
//!   responses and notifications, runs the heartbeat and the reconnect
//!   backoff.
//! - [`ProcessSupervisor`] spawns the worker, wires its streams through the
//!   line framer, performs the handshake, shuts the worker down and recovers
//!   from crashes.
//!
//! Collaborators observe everything through [`ChannelEvent`]s published on a
//! broadcast bus.

mod backoff;
mod connection;
mod error;
mod events;
mod registry;
mod state;
mod supervisor;

pub use connection::{ChannelSink, ConnectionManager, ConnectionSettings, WorkerSink};
pub use error::ChannelError;
pub use events::{ChannelEvent, WorkerNotification};
pub use registry::{RequestOutcome, RequestRegistry};
pub use state::ConnectionState;
pub use supervisor::{ProcessSupervisor, SupervisorSettings, WORKER_STDERR_TARGET};
