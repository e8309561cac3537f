//! Correlation of in-flight requests with their eventual outcome.
//!
//! Each pending request owns a oneshot responder and a deadline task. The
//! first of response, rejection, deadline or cancellation removes the entry
//! and completes the responder; everything after that finds nothing and is
//! discarded.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::ChannelError;

/// Log target for registry operations.
pub(crate) const REGISTRY_TARGET: &str = "tether_host::registry";

/// Outcome delivered to the caller of a request.
pub type RequestOutcome = Result<Value, ChannelError>;

type Entries = Mutex<HashMap<String, PendingRequest>>;

struct PendingRequest {
    method: String,
    responder: oneshot::Sender<RequestOutcome>,
    deadline: AbortHandle,
}

impl PendingRequest {
    fn complete(self, outcome: RequestOutcome) {
        self.deadline.abort();
        // The caller may have stopped waiting; nothing to do then.
        let _ = self.responder.send(outcome);
    }
}

/// Tracks pending requests keyed by correlation id.
#[derive(Clone, Default)]
pub struct RequestRegistry {
    entries: Arc<Entries>,
}

impl RequestRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` and arms its deadline.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::DuplicateId`] when `id` is already pending.
    pub fn register(
        &self,
        id: impl Into<String>,
        method: impl Into<String>,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<RequestOutcome>, ChannelError> {
        let key = id.into();
        let mut entries = self.lock();
        if entries.contains_key(&key) {
            return Err(ChannelError::DuplicateId { id: key });
        }

        let (responder, receiver) = oneshot::channel();
        let deadline = tokio::spawn(expire(
            Arc::downgrade(&self.entries),
            key.clone(),
            timeout,
        ))
        .abort_handle();

        let entry = PendingRequest {
            method: method.into(),
            responder,
            deadline,
        };
        debug!(target: REGISTRY_TARGET, id = %key, method = %entry.method, "registered request");
        entries.insert(key, entry);
        Ok(receiver)
    }

    /// Completes `id` with a result. Returns `false` for unknown ids.
    pub fn resolve(&self, id: &str, result: Value) -> bool {
        self.complete(id, |_| Ok(result))
    }

    /// Completes `id` with the worker's error text. Returns `false` for
    /// unknown ids.
    pub fn reject(&self, id: &str, message: impl Into<String>) -> bool {
        let text = message.into();
        self.complete(id, |method| {
            Err(ChannelError::WorkerReported {
                id: id.to_owned(),
                method: method.to_owned(),
                message: text,
            })
        })
    }

    /// Completes `id` with an arbitrary channel error. Returns `false` for
    /// unknown ids.
    pub fn fail(&self, id: &str, error: ChannelError) -> bool {
        self.complete(id, |_| Err(error))
    }

    /// Rejects every pending request with `error`, leaving the registry empty.
    pub fn cancel_all(&self, error: &ChannelError) -> usize {
        let drained: Vec<PendingRequest> = self.lock().drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for entry in drained {
            entry.complete(Err(error.clone()));
        }
        if count > 0 {
            debug!(target: REGISTRY_TARGET, count, %error, "cancelled pending requests");
        }
        count
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns `true` when `id` is pending.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    fn complete(&self, id: &str, outcome: impl FnOnce(&str) -> RequestOutcome) -> bool {
        let Some(entry) = self.lock().remove(id) else {
            debug!(
                target: REGISTRY_TARGET,
                id,
                "discarding outcome for unknown or expired request"
            );
            return false;
        };
        let outcome = outcome(&entry.method);
        entry.complete(outcome);
        true
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

async fn expire(registry: Weak<Entries>, id: String, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(entries) = registry.upgrade() else {
        return;
    };
    let entry = entries
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .remove(&id);
    if let Some(entry) = entry {
        debug!(target: REGISTRY_TARGET, id = %id, method = %entry.method, "request timed out");
        let error = ChannelError::RequestTimeout {
            id,
            method: entry.method.clone(),
            timeout,
        };
        let _ = entry.responder.send(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn resolves_exactly_once() {
        let registry = RequestRegistry::new();
        let receiver = registry
            .register("req_1", "list_tasks", TIMEOUT)
            .expect("register");

        assert!(registry.resolve("req_1", json!(["a"])));
        assert!(!registry.resolve("req_1", json!(["b"])));
        assert!(!registry.reject("req_1", "late"));

        let outcome = receiver.await.expect("responder kept");
        assert_eq!(outcome.expect("success"), json!(["a"]));
        assert!(registry.is_empty());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn reject_carries_method_and_message() {
        let registry = RequestRegistry::new();
        let receiver = registry
            .register("req_2", "tool_request", TIMEOUT)
            .expect("register");

        assert!(registry.reject("req_2", "tool exploded"));

        let error = receiver.await.expect("responder kept").expect_err("failure");
        assert!(matches!(
            error,
            ChannelError::WorkerReported { ref method, ref message, .. }
                if method == "tool_request" && message == "tool exploded"
        ));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn deadline_rejects_and_late_response_is_dropped() {
        let registry = RequestRegistry::new();
        let receiver = registry
            .register("req_3", "start_task", Duration::from_millis(500))
            .expect("register");

        let error = receiver.await.expect("responder kept").expect_err("timeout");

        assert!(matches!(
            error,
            ChannelError::RequestTimeout { ref id, ref method, timeout }
                if id == "req_3" && method == "start_task" && timeout == Duration::from_millis(500)
        ));
        assert!(!registry.contains("req_3"));
        assert!(!registry.resolve("req_3", json!({})));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn duplicate_id_is_refused() {
        let registry = RequestRegistry::new();
        let _receiver = registry
            .register("req_4", "health_check", TIMEOUT)
            .expect("register");

        let error = registry
            .register("req_4", "health_check", TIMEOUT)
            .expect_err("duplicate");

        assert!(matches!(error, ChannelError::DuplicateId { ref id } if id == "req_4"));
        assert_eq!(registry.len(), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn cancel_all_rejects_everything() {
        let registry = RequestRegistry::new();
        let receivers: Vec<_> = (0..4)
            .map(|n| {
                registry
                    .register(format!("req_{n}"), "list_tasks", TIMEOUT)
                    .expect("register")
            })
            .collect();

        let cancelled = registry.cancel_all(&ChannelError::ConnectionReset);

        assert_eq!(cancelled, 4);
        assert!(registry.is_empty());
        for receiver in receivers {
            let error = receiver.await.expect("responder kept").expect_err("reset");
            assert!(matches!(error, ChannelError::ConnectionReset));
        }
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn resolved_request_does_not_time_out_later() {
        let registry = RequestRegistry::new();
        let receiver = registry
            .register("req_5", "get_task_status", Duration::from_secs(1))
            .expect("register");
        assert!(registry.resolve("req_5", json!("done")));

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(receiver.await.expect("responder kept").expect("ok"), json!("done"));
    }
}
