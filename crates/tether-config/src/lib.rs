//! Shared configuration for the Tether worker channel.
//!
//! [`Config`] is layered by `ortho_config`: built-in defaults, then
//! `.tether.toml` configuration files, then `TETHER_*` environment variables,
//! then command-line flags. Timing values are stored in milliseconds so every
//! layer can express them as plain integers; the accessors hand out
//! [`Duration`] values to the runtime crates.

mod defaults;
mod logging;
mod worker;

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CRASH_RESTART_DELAY_MS, DEFAULT_HANDSHAKE_GRACE_MS, DEFAULT_HANDSHAKE_POLL_MS,
    DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INITIAL_DELAY_MS,
    DEFAULT_RECONNECT_MAX_DELAY_MS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SEARCH_PATH_VAR,
    DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_UNBUFFERED_VAR, DEFAULT_WORKER_COMMAND,
    DEFAULT_WORKER_ENTRYPOINT, DEFAULT_WORKER_ROOT, default_log_filter_string,
    default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use worker::{WorkerLaunch, WorkerLaunchError};

/// Resolved configuration for the worker channel and its binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "TETHER")]
pub struct Config {
    /// Interpreter or executable that runs the worker.
    #[ortho_config(default = defaults::default_worker_command())]
    pub worker_command: String,
    /// Script passed to the worker command, relative to `worker_root`.
    #[ortho_config(default = defaults::default_worker_entrypoint())]
    pub worker_entrypoint: String,
    /// Directory containing the worker sources; also the working directory.
    #[ortho_config(default = defaults::default_worker_root())]
    pub worker_root: Utf8PathBuf,
    /// Environment variable pointed at `worker_root` for module lookup.
    #[ortho_config(default = defaults::default_search_path_var())]
    pub search_path_var: String,
    /// Environment variable set to `1` to disable worker output buffering.
    #[ortho_config(default = defaults::default_unbuffered_var())]
    pub unbuffered_var: String,
    /// Per-request deadline in milliseconds.
    #[ortho_config(default = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,
    /// Heartbeat interval in milliseconds.
    #[ortho_config(default = DEFAULT_HEARTBEAT_INTERVAL_MS)]
    pub heartbeat_interval_ms: u64,
    /// Delay before the first handshake health check in milliseconds.
    #[ortho_config(default = DEFAULT_HANDSHAKE_GRACE_MS)]
    pub handshake_grace_ms: u64,
    /// Interval between handshake health checks in milliseconds.
    #[ortho_config(default = DEFAULT_HANDSHAKE_POLL_MS)]
    pub handshake_poll_ms: u64,
    /// Overall handshake budget in milliseconds.
    #[ortho_config(default = DEFAULT_HANDSHAKE_TIMEOUT_MS)]
    pub handshake_timeout_ms: u64,
    /// Consecutive reconnect attempts allowed after a crash.
    #[ortho_config(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnect_attempts: u32,
    /// First reconnect delay in milliseconds; doubles per attempt.
    #[ortho_config(default = DEFAULT_RECONNECT_INITIAL_DELAY_MS)]
    pub reconnect_initial_delay_ms: u64,
    /// Upper bound for the reconnect delay in milliseconds.
    #[ortho_config(default = DEFAULT_RECONNECT_MAX_DELAY_MS)]
    pub reconnect_max_delay_ms: u64,
    /// Fixed wait after a crash before recovery starts, in milliseconds.
    #[ortho_config(default = DEFAULT_CRASH_RESTART_DELAY_MS)]
    pub crash_restart_delay_ms: u64,
    /// Budget for graceful shutdown before a forced kill, in milliseconds.
    #[ortho_config(default = DEFAULT_SHUTDOWN_TIMEOUT_MS)]
    pub shutdown_timeout_ms: u64,
    /// Tracing filter expression.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_command: defaults::default_worker_command(),
            worker_entrypoint: defaults::default_worker_entrypoint(),
            worker_root: defaults::default_worker_root(),
            search_path_var: defaults::default_search_path_var(),
            unbuffered_var: defaults::default_unbuffered_var(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            handshake_grace_ms: DEFAULT_HANDSHAKE_GRACE_MS,
            handshake_poll_ms: DEFAULT_HANDSHAKE_POLL_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_initial_delay_ms: DEFAULT_RECONNECT_INITIAL_DELAY_MS,
            reconnect_max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
            crash_restart_delay_ms: DEFAULT_CRASH_RESTART_DELAY_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
        }
    }
}

impl Config {
    /// Loads configuration from files, environment and process arguments.
    ///
    /// # Errors
    ///
    /// Returns the loader's error for unreadable files or invalid values.
    pub fn load_layered() -> Result<Self, Arc<OrthoError>> {
        Self::load()
    }

    /// Loads configuration with an explicit argument list in place of the
    /// process arguments. The first item is the program name.
    ///
    /// # Errors
    ///
    /// Returns the loader's error for unreadable files or invalid values.
    pub fn load_from_args(args: Vec<OsString>) -> Result<Self, Arc<OrthoError>> {
        Self::load_from_iter(args)
    }

    /// Per-request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Interval between heartbeat health checks.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Grace period before the first handshake health check.
    #[must_use]
    pub const fn handshake_grace(&self) -> Duration {
        Duration::from_millis(self.handshake_grace_ms)
    }

    /// Interval between handshake health checks.
    #[must_use]
    pub const fn handshake_poll(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_ms)
    }

    /// Overall handshake budget.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// First reconnect delay.
    #[must_use]
    pub const fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    /// Ceiling for the reconnect delay.
    #[must_use]
    pub const fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Fixed wait after a crash before recovery.
    #[must_use]
    pub const fn crash_restart_delay(&self) -> Duration {
        Duration::from_millis(self.crash_restart_delay_ms)
    }

    /// Budget for graceful shutdown.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Output format for structured logs.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
