//! Correlation id generation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::message::timestamp_millis;

/// Produces request ids of the form `req_<counter>_<millis>`.
///
/// The counter is monotonic for the lifetime of the generator, so ids stay
/// unique even when two requests are issued within the same millisecond.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    /// Creates a generator whose first id uses counter value `1`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Returns the next unique id.
    pub fn next_id(&self) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req_{sequence}_{}", timestamp_millis())
    }
}
