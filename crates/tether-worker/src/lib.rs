//! Worker-side runtime for the Tether channel.
//!
//! A worker reads newline-delimited requests on stdin and writes responses
//! and notifications on stdout. [`WorkerRuntime`] owns that loop: it answers
//! the liveness and shutdown methods itself and hands everything else to a
//! [`RequestHandler`].

mod error;
mod handler;
mod runtime;

pub use error::WorkerError;
pub use handler::{Notifier, RequestHandler};
pub use runtime::{RUNTIME_TARGET, ServeOutcome, WorkerRuntime};

#[cfg(test)]
mod tests;
