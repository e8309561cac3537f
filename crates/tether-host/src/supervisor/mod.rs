//! Lifecycle of the external worker process.
//!
//! [`ProcessSupervisor`] spawns the worker, bridges its streams to the
//! [`ConnectionManager`], performs the polling handshake, shuts the worker
//! down (gracefully, then by force) and recovers from crashes by driving the
//! manager's reconnect backoff. Lifecycle operations are serialised by one
//! async lock; the process slot itself is only touched in short synchronous
//! sections.

mod process;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::{Value, json};
use tether_config::{Config, WorkerLaunch};
use tether_protocol::RequestMethod;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use self::process::{WorkerExit, WorkerProcess, exited};
use crate::connection::{ConnectionManager, ConnectionSettings};
use crate::error::ChannelError;
use crate::events::ChannelEvent;
use crate::state::ConnectionState;

pub use self::process::WORKER_STDERR_TARGET;

/// Log target for supervisor operations.
pub(crate) const SUPERVISOR_TARGET: &str = "tether_host::supervisor";

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Timing policy of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Wait after spawning before the first handshake health check.
    pub handshake_grace: Duration,
    /// Interval between handshake health checks.
    pub handshake_poll: Duration,
    /// Overall handshake budget, grace period included.
    pub handshake_timeout: Duration,
    /// Fixed wait after a crash before the reconnect loop starts.
    pub crash_restart_delay: Duration,
    /// Budget for a graceful shutdown before the worker is killed.
    pub shutdown_timeout: Duration,
}

impl SupervisorSettings {
    /// Extracts the supervisor policy from the shared configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            handshake_grace: config.handshake_grace(),
            handshake_poll: config.handshake_poll(),
            handshake_timeout: config.handshake_timeout(),
            crash_restart_delay: config.crash_restart_delay(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Default)]
struct Slot {
    process: Option<WorkerProcess>,
    generation: u64,
    init_failed: bool,
    recovering: bool,
    recovery: Option<JoinHandle<()>>,
    liveness: Option<JoinHandle<()>>,
}

struct SupervisorInner {
    config: Config,
    settings: SupervisorSettings,
    connection: ConnectionManager,
    lifecycle: tokio::sync::Mutex<()>,
    slot: Mutex<Slot>,
}

impl Drop for SupervisorInner {
    fn drop(&mut self) {
        let slot = self
            .slot
            .get_mut()
            .unwrap_or_else(|poison| poison.into_inner());
        for handle in [slot.recovery.take(), slot.liveness.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

/// Owner of the worker process for one session.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ProcessSupervisor {
    /// Creates a supervisor; nothing is spawned until first use.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let connection = ConnectionManager::new(ConnectionSettings::from_config(&config));
        let settings = SupervisorSettings::from_config(&config);
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                settings,
                connection,
                lifecycle: tokio::sync::Mutex::new(()),
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    /// Spawns the worker and waits for the handshake.
    ///
    /// Returns immediately when a worker is already connected.
    ///
    /// # Errors
    ///
    /// Launch and spawn failures, [`ChannelError::WorkerExited`] when the
    /// worker dies during the handshake, and
    /// [`ChannelError::InitializationTimeout`] when it never answers. A timed
    /// out worker is left running and blocks lazy starts until
    /// [`ProcessSupervisor::restart`].
    pub async fn initialize(&self) -> Result<(), ChannelError> {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.initialize_locked().await
    }

    /// Sends a request, starting the worker first when needed.
    ///
    /// # Errors
    ///
    /// [`ChannelError::InitializationBlocked`] after a failed handshake,
    /// initialisation errors, or whatever settles the request.
    pub async fn send_request(
        &self,
        method: RequestMethod,
        params: Value,
    ) -> Result<Value, ChannelError> {
        if !self.inner.connection.state().is_connected() {
            if self.inner.slot().init_failed {
                return Err(ChannelError::InitializationBlocked);
            }
            self.initialize().await?;
        }
        self.inner.connection.send_request(method, params).await
    }

    /// Stops the worker and starts a fresh one with a clean connection.
    ///
    /// # Errors
    ///
    /// Whatever the new initialisation fails with; the failure is logged.
    pub async fn restart(&self) -> Result<(), ChannelError> {
        self.inner.cancel_recovery();
        let _guard = self.inner.lifecycle.lock().await;
        info!(target: SUPERVISOR_TARGET, "restarting worker");

        self.inner.dispose_locked().await;
        self.inner.connection.reset_connection();
        self.inner.slot().init_failed = false;

        let result = self.inner.initialize_locked().await;
        if let Err(err) = &result {
            error!(target: SUPERVISOR_TARGET, error = %err, "worker restart failed");
        }
        result
    }

    /// Shuts the worker down: `shutdown` first, a kill when that fails or
    /// times out. Pending requests fail with
    /// [`ChannelError::ShutdownInProgress`]. Does nothing without a worker.
    pub async fn dispose(&self) {
        self.inner.cancel_recovery();
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.dispose_locked().await;
    }

    /// Returns `true` while a worker process is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Time since the current worker was spawned.
    #[must_use]
    pub fn uptime(&self) -> Option<Duration> {
        self.inner
            .slot()
            .process
            .as_ref()
            .map(|process| process.started_at.elapsed())
    }

    /// Operating-system id of the current worker.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.inner.slot().process.as_ref().and_then(|process| process.pid)
    }

    /// Connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Subscribes to channel events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.connection.subscribe()
    }

    /// The connection this supervisor drives.
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// Configuration the supervisor was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("pid", &self.pid())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SupervisorInner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn is_running(&self) -> bool {
        self.slot()
            .process
            .as_ref()
            .is_some_and(|process| !process.has_exited())
    }

    fn has_live_connection(&self) -> bool {
        self.is_running() && self.connection.state().is_connected()
    }

    fn cancel_recovery(&self) {
        let mut slot = self.slot();
        slot.recovering = false;
        if let Some(handle) = slot.recovery.take() {
            handle.abort();
        }
    }

    // Boxed: the exit watcher spawned here can lead back into this method
    // through crash recovery.
    fn initialize_locked(self: &Arc<Self>) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            if self.is_running() {
                if self.connection.state().is_connected() {
                    debug!(target: SUPERVISOR_TARGET, "worker already connected");
                    return Ok(());
                }
                self.dispose_locked().await;
            }

            let launch = WorkerLaunch::from_config(&self.config)?;
            let generation = {
                let mut slot = self.slot();
                slot.generation += 1;
                slot.generation
            };

            self.connection.set_state(ConnectionState::Connecting);
            let (process, sink) = match process::spawn(&launch, generation, &self.connection) {
                Ok(spawned) => spawned,
                Err(err) => {
                    error!(target: SUPERVISOR_TARGET, error = %err, "failed to spawn worker");
                    self.connection.set_state(ConnectionState::Disconnected);
                    return Err(err);
                }
            };
            info!(
                target: SUPERVISOR_TARGET,
                pid = ?process.pid,
                generation,
                "worker process started"
            );

            let exit = process.exit_watch();
            self.watch_liveness();
            self.connection.attach(Arc::new(sink));
            self.slot().process = Some(process);
            tokio::spawn(watch_exit(Arc::downgrade(self), generation, exit.clone()));

            match self.handshake(exit).await {
                Ok(()) => {
                    self.slot().init_failed = false;
                    self.connection.set_state(ConnectionState::Connected);
                    info!(target: SUPERVISOR_TARGET, generation, "worker connected");
                    Ok(())
                }
                Err(err) => {
                    if matches!(err, ChannelError::InitializationTimeout { .. }) {
                        self.slot().init_failed = true;
                        self.connection.set_state(ConnectionState::Error);
                    }
                    error!(target: SUPERVISOR_TARGET, generation, error = %err, "worker initialisation failed");
                    Err(err)
                }
            }
        })
    }

    /// Kills a worker whose heartbeat failed so crash recovery takes over.
    fn watch_liveness(self: &Arc<Self>) {
        let mut slot = self.slot();
        if slot.liveness.is_some() {
            return;
        }
        let mut events = self.connection.subscribe();
        let weak = Arc::downgrade(self);
        slot.liveness = Some(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(target: SUPERVISOR_TARGET, skipped, "liveness watcher lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let ChannelEvent::HeartbeatFailed { reason } = event else {
                    continue;
                };
                let Some(supervisor) = weak.upgrade() else {
                    break;
                };
                warn!(target: SUPERVISOR_TARGET, %reason, "worker unresponsive; killing it");
                if let Some(process) = supervisor.slot().process.as_mut() {
                    process.kill();
                }
            }
        }));
    }

    async fn handshake(
        &self,
        exit: watch::Receiver<Option<WorkerExit>>,
    ) -> Result<(), ChannelError> {
        let settings = self.settings;
        let deadline = Instant::now() + settings.handshake_timeout;
        // Each tick issues its own check; a worker that never answers one
        // does not hold up the ones after it.
        let checking = async {
            time::sleep(settings.handshake_grace).await;
            let mut ticker = time::interval(settings.handshake_poll.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut checks = JoinSet::new();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let connection = self.connection.clone();
                        checks.spawn(async move { connection.check_health().await });
                    }
                    Some(joined) = checks.join_next() => match joined {
                        Ok(Ok(_)) => return,
                        Ok(Err(err)) => {
                            debug!(target: SUPERVISOR_TARGET, error = %err, "handshake health check failed");
                        }
                        Err(err) => {
                            debug!(target: SUPERVISOR_TARGET, error = %err, "handshake health check task failed");
                        }
                    },
                }
            }
        };

        tokio::select! {
            outcome = time::timeout_at(deadline, checking) => outcome.map_err(|_| {
                ChannelError::InitializationTimeout {
                    timeout: settings.handshake_timeout,
                }
            }),
            status = exited(exit) => Err(ChannelError::WorkerExited { code: status.code }),
        }
    }

    async fn dispose_locked(&self) {
        let Some(mut process) = self.slot().process.take() else {
            debug!(target: SUPERVISOR_TARGET, "no worker to dispose");
            return;
        };
        let budget = self.settings.shutdown_timeout;
        let started = Instant::now();
        info!(target: SUPERVISOR_TARGET, pid = ?process.pid, "stopping worker");

        let graceful = match time::timeout(
            budget,
            self.connection
                .send_request(RequestMethod::Shutdown, json!({})),
        )
        .await
        {
            Ok(Ok(_)) => {
                let remaining = budget.saturating_sub(started.elapsed());
                time::timeout(remaining, exited(process.exit_watch()))
                    .await
                    .is_ok()
            }
            Ok(Err(err)) => {
                debug!(target: SUPERVISOR_TARGET, error = %err, "shutdown request failed");
                false
            }
            Err(_) => {
                warn!(target: SUPERVISOR_TARGET, pid = ?process.pid, "worker ignored shutdown request");
                false
            }
        };

        if !graceful {
            warn!(target: SUPERVISOR_TARGET, pid = ?process.pid, "killing worker");
            process.kill();
            if time::timeout(budget, exited(process.exit_watch()))
                .await
                .is_err()
            {
                error!(target: SUPERVISOR_TARGET, pid = ?process.pid, "worker did not exit after kill");
            }
        }

        self.connection.detach();
        self.connection.stop_heartbeat();
        self.connection
            .cancel_pending(&ChannelError::ShutdownInProgress);
        self.connection.set_state(ConnectionState::Disconnected);
        info!(target: SUPERVISOR_TARGET, pid = ?process.pid, graceful, "worker stopped");
    }

    fn on_exit(self: &Arc<Self>, generation: u64, exit: WorkerExit) {
        let (process, schedule) = {
            let mut slot = self.slot();
            let owned = slot
                .process
                .as_ref()
                .is_some_and(|process| process.generation == generation);
            if !owned {
                debug!(target: SUPERVISOR_TARGET, generation, "ignoring exit of a retired worker");
                return;
            }
            let process = slot.process.take();
            let schedule =
                !exit.success && !slot.recovering && !self.connection.is_exhausted();
            slot.recovering |= schedule;
            (process, schedule)
        };
        let uptime = process
            .map(|process| process.started_at.elapsed())
            .unwrap_or_default();

        warn!(
            target: SUPERVISOR_TARGET,
            generation,
            code = ?exit.code,
            uptime_ms = u64::try_from(uptime.as_millis()).unwrap_or(u64::MAX),
            "worker exited"
        );
        self.connection.detach();
        self.connection.cancel_pending(&ChannelError::ConnectionReset);
        self.connection.set_state(ConnectionState::Disconnected);
        self.connection.emit(ChannelEvent::WorkerExited {
            code: exit.code,
            uptime,
        });

        if schedule {
            let handle = tokio::spawn(recover(Arc::downgrade(self)));
            self.slot().recovery = Some(handle);
        }
    }
}

async fn watch_exit(
    weak: Weak<SupervisorInner>,
    generation: u64,
    exit: watch::Receiver<Option<WorkerExit>>,
) {
    let status = exited(exit).await;
    if let Some(supervisor) = weak.upgrade() {
        supervisor.on_exit(generation, status);
    }
}

fn recover(inner: Weak<SupervisorInner>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let Some(delay) = inner.upgrade().map(|sup| sup.settings.crash_restart_delay) else {
            return;
        };
        info!(
            target: SUPERVISOR_TARGET,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "worker crashed; scheduling recovery"
        );
        time::sleep(delay).await;

        loop {
            let Some(supervisor) = inner.upgrade() else {
                return;
            };
            // Held through the backoff so a lazy start cannot slip in between
            // the liveness check and the respawn.
            let _guard = supervisor.lifecycle.lock().await;
            if supervisor.has_live_connection() {
                info!(target: SUPERVISOR_TARGET, "worker already reconnected; skipping recovery");
                break;
            }
            let Ok(attempt) = supervisor.connection.attempt_reconnect().await else {
                break;
            };

            match supervisor.initialize_locked().await {
                Ok(()) => {
                    // A worker that died straight after the handshake has
                    // already been taken out of the slot; keep trying.
                    let mut slot = supervisor.slot();
                    if slot.process.is_some() {
                        slot.recovering = false;
                        slot.recovery = None;
                        drop(slot);
                        info!(target: SUPERVISOR_TARGET, attempt, "worker recovered");
                        return;
                    }
                }
                Err(err) => {
                    warn!(target: SUPERVISOR_TARGET, attempt, error = %err, "reconnect attempt failed");
                    supervisor.dispose_locked().await;
                }
            }
        }

        if let Some(supervisor) = inner.upgrade() {
            let mut slot = supervisor.slot();
            slot.recovering = false;
            slot.recovery = None;
        }
    })
}
