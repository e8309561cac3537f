//! Protocol session management on top of the worker's byte channel.
//!
//! [`ConnectionManager`] owns the connection state machine, request
//! correlation, notification dispatch, the heartbeat and the reconnect
//! backoff. It never touches the process: the supervisor attaches a
//! [`WorkerSink`] for outbound lines and feeds decoded inbound messages to
//! [`ConnectionManager::handle_message`].

mod heartbeat;
mod sink;

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Value, json};
use tether_config::Config;
use tether_protocol::{Message, Notification, Request, RequestIdGenerator, RequestMethod, Response};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

pub use sink::{ChannelSink, WorkerSink};

use crate::backoff::ReconnectBackoff;
use crate::error::ChannelError;
use crate::events::{ChannelEvent, EVENT_CAPACITY, WorkerNotification};
use crate::registry::RequestRegistry;
use crate::state::ConnectionState;

/// Log target for connection operations.
pub(crate) const CONNECTION_TARGET: &str = "tether_host::connection";

/// Timing and retry policy of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Deadline applied to every request, heartbeats included.
    pub request_timeout: Duration,
    /// Interval between heartbeat health checks; zero disables the heartbeat.
    pub heartbeat_interval: Duration,
    /// Consecutive reconnect attempts allowed.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub reconnect_initial_delay: Duration,
    /// Ceiling for the doubling reconnect delay.
    pub reconnect_max_delay: Duration,
}

impl ConnectionSettings {
    /// Extracts the connection policy from the shared configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_initial_delay: config.reconnect_initial_delay(),
            reconnect_max_delay: config.reconnect_max_delay(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct Shared {
    state: ConnectionState,
    last_heartbeat: Option<Instant>,
    backoff: ReconnectBackoff,
    exhausted: bool,
    heartbeat: Option<JoinHandle<()>>,
    sink: Option<Arc<dyn WorkerSink>>,
}

pub(crate) struct Inner {
    settings: ConnectionSettings,
    registry: RequestRegistry,
    ids: RequestIdGenerator,
    events: broadcast::Sender<ChannelEvent>,
    shared: Mutex<Shared>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self
            .shared
            .get_mut()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(handle) = shared.heartbeat.take() {
            handle.abort();
        }
    }
}

/// Cloneable handle to one worker connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a disconnected manager.
    #[must_use]
    pub fn new(settings: ConnectionSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let backoff = ReconnectBackoff::new(
            settings.max_reconnect_attempts,
            settings.reconnect_initial_delay,
            settings.reconnect_max_delay,
        );
        Self {
            inner: Arc::new(Inner {
                settings,
                registry: RequestRegistry::new(),
                ids: RequestIdGenerator::new(),
                events,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    last_heartbeat: None,
                    backoff,
                    exhausted: false,
                    heartbeat: None,
                    sink: None,
                }),
            }),
        }
    }

    /// Subscribes to channel events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Policy this manager was built with.
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    /// Time of the last successful heartbeat or connection.
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.lock().last_heartbeat
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.registry.len()
    }

    /// Consecutive reconnect attempts since the last connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().backoff.attempts()
    }

    /// Returns `true` once reconnecting has given up for this session.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.lock().exhausted
    }

    /// Binds the outbound writer.
    pub fn attach(&self, sink: Arc<dyn WorkerSink>) {
        self.lock().sink = Some(sink);
    }

    /// Unbinds the outbound writer.
    pub fn detach(&self) {
        self.lock().sink = None;
    }

    /// Moves the state machine to `next`, running transition side effects.
    pub fn set_state(&self, next: ConnectionState) {
        let mut events = Vec::with_capacity(2);
        let previous = {
            let mut shared = self.lock();
            let current = shared.state;
            if current == next {
                return;
            }
            shared.state = next;
            if current.is_connected() {
                stop_heartbeat(&mut shared);
            }
            events.push(ChannelEvent::StateChanged(next));
            match next {
                ConnectionState::Connected => {
                    shared.backoff.reset();
                    shared.exhausted = false;
                    shared.last_heartbeat = Some(Instant::now());
                    let period = self.inner.settings.heartbeat_interval;
                    if !period.is_zero() {
                        shared.heartbeat =
                            Some(heartbeat::spawn(Arc::downgrade(&self.inner), period));
                    }
                    events.push(ChannelEvent::Connected);
                }
                ConnectionState::Disconnected => events.push(ChannelEvent::Disconnected),
                ConnectionState::Connecting | ConnectionState::Error => {}
            }
            current
        };

        info!(
            target: CONNECTION_TARGET,
            from = %previous,
            to = %next,
            "connection state changed"
        );
        for event in events {
            self.emit(event);
        }
    }

    /// Sends a request and waits for its outcome.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NotConnected`] unless connected; otherwise whatever
    /// settles the request: a timeout, a worker error, a reset or shutdown.
    pub async fn send_request(
        &self,
        method: RequestMethod,
        params: Value,
    ) -> Result<Value, ChannelError> {
        let state = self.state();
        if !state.is_connected() {
            return Err(ChannelError::NotConnected { state });
        }
        self.dispatch(method, params).await
    }

    /// Sends a `health_check` regardless of state; used by the handshake.
    pub(crate) async fn check_health(&self) -> Result<Value, ChannelError> {
        self.dispatch(RequestMethod::HealthCheck, json!({})).await
    }

    pub(crate) async fn dispatch(
        &self,
        method: RequestMethod,
        params: Value,
    ) -> Result<Value, ChannelError> {
        let registry = &self.inner.registry;
        let id = self.inner.ids.next_id();
        let receiver = registry.register(
            id.as_str(),
            method.as_str(),
            self.inner.settings.request_timeout,
        )?;

        let line = match Message::from(Request::new(id.as_str(), method, params)).to_line() {
            Ok(line) => line,
            Err(err) => {
                let error = ChannelError::from(err);
                registry.fail(&id, error.clone());
                return Err(error);
            }
        };

        let sink = self.lock().sink.clone();
        let sent = sink
            .ok_or(ChannelError::ChannelClosed)
            .and_then(|sink| sink.send_line(line));
        if let Err(error) = sent {
            registry.fail(&id, error.clone());
            return Err(error);
        }

        debug!(target: CONNECTION_TARGET, id = %id, method = %method, "request sent");
        receiver.await.unwrap_or(Err(ChannelError::ChannelClosed))
    }

    /// Routes one decoded inbound message.
    pub fn handle_message(&self, message: Message) {
        match message {
            Message::Response(response) => self.handle_response(response),
            Message::Notification(notification) => self.handle_notification(notification),
            Message::Request(request) => warn!(
                target: CONNECTION_TARGET,
                id = request.id(),
                method = request.method_name(),
                "dropping request sent by the worker"
            ),
        }
    }

    /// Settles the pending request a response refers to.
    pub fn handle_response(&self, response: Response) {
        let (id, outcome) = response.into_outcome();
        match outcome {
            Ok(result) => self.inner.registry.resolve(&id, result),
            Err(message) => self.inner.registry.reject(&id, message),
        };
    }

    /// Publishes a notification as a typed event.
    pub fn handle_notification(&self, notification: Notification) {
        let Some(kind) = notification.method() else {
            warn!(
                target: CONNECTION_TARGET,
                method = notification.method_name(),
                "dropping notification with unknown method"
            );
            return;
        };
        let timestamp = notification.timestamp();
        debug!(target: CONNECTION_TARGET, method = %kind, "notification received");
        self.emit(ChannelEvent::Notification(WorkerNotification::new(
            kind,
            notification.into_params(),
            timestamp,
        )));
    }

    /// Records a reconnect attempt and waits its backoff delay.
    ///
    /// Returns the one-based attempt number after the delay; the caller is
    /// expected to re-spawn the worker next.
    ///
    /// # Errors
    ///
    /// [`ChannelError::ReconnectLimitExceeded`] once the consecutive budget
    /// is spent. The manager then stays in `error` and emits
    /// [`ChannelEvent::ReconnectExhausted`] the first time only.
    pub async fn attempt_reconnect(&self) -> Result<u32, ChannelError> {
        let step = {
            let mut shared = self.lock();
            let max = shared.backoff.max_attempts();
            shared.backoff.next_attempt().ok_or(max)
        };

        match step {
            Err(attempts) => {
                let first = !mem::replace(&mut self.lock().exhausted, true);
                self.set_state(ConnectionState::Error);
                if first {
                    error!(
                        target: CONNECTION_TARGET,
                        attempts,
                        "giving up on reconnecting to the worker"
                    );
                    self.emit(ChannelEvent::ReconnectExhausted { attempts });
                }
                Err(ChannelError::ReconnectLimitExceeded { attempts })
            }
            Ok((attempt, delay)) => {
                self.set_state(ConnectionState::Connecting);
                info!(
                    target: CONNECTION_TARGET,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "scheduling reconnect attempt"
                );
                time::sleep(delay).await;
                self.emit(ChannelEvent::ReconnectAttempt { attempt });
                Ok(attempt)
            }
        }
    }

    /// Clears reconnect state and rejects everything pending with
    /// [`ChannelError::ConnectionReset`].
    pub fn reset_connection(&self) {
        {
            let mut shared = self.lock();
            shared.backoff.reset();
            shared.exhausted = false;
            stop_heartbeat(&mut shared);
        }
        let cancelled = self.cancel_pending(&ChannelError::ConnectionReset);
        info!(target: CONNECTION_TARGET, cancelled, "connection reset");
    }

    pub(crate) fn cancel_pending(&self, error: &ChannelError) -> usize {
        self.inner.registry.cancel_all(error)
    }

    pub(crate) fn stop_heartbeat(&self) {
        stop_heartbeat(&mut self.lock());
    }

    pub(crate) fn emit(&self, event: ChannelEvent) {
        // No subscribers is not an error.
        let _ = self.inner.events.send(event);
    }

    /// One heartbeat round. Returns `false` when the loop should stop.
    async fn heartbeat_once(&self) -> bool {
        if !self.state().is_connected() {
            return false;
        }

        match self.send_request(RequestMethod::HealthCheck, json!({})).await {
            Ok(_) => {
                self.lock().last_heartbeat = Some(Instant::now());
                debug!(target: CONNECTION_TARGET, "heartbeat acknowledged");
                true
            }
            Err(err) => {
                if !self.state().is_connected() {
                    return false;
                }
                warn!(target: CONNECTION_TARGET, error = %err, "heartbeat failed");
                self.set_state(ConnectionState::Error);
                self.emit(ChannelEvent::HeartbeatFailed {
                    reason: err.to_string(),
                });
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionSettings::default())
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.lock();
        f.debug_struct("ConnectionManager")
            .field("state", &shared.state)
            .field("attached", &shared.sink.is_some())
            .field("reconnect_attempts", &shared.backoff.attempts())
            .field("exhausted", &shared.exhausted)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

fn stop_heartbeat(shared: &mut Shared) {
    if let Some(handle) = shared.heartbeat.take() {
        handle.abort();
    }
}

#[cfg(test)]
mod tests;
