use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Interpreter used to launch the worker when none is configured.
pub const DEFAULT_WORKER_COMMAND: &str = "python";

/// Script handed to the interpreter, relative to the worker root.
pub const DEFAULT_WORKER_ENTRYPOINT: &str = "main.py";

/// Directory holding the worker sources.
pub const DEFAULT_WORKER_ROOT: &str = "python";

/// Environment variable that receives the worker root as a module search path.
pub const DEFAULT_SEARCH_PATH_VAR: &str = "PYTHONPATH";

/// Environment variable set to `1` so the worker flushes stdout per line.
pub const DEFAULT_UNBUFFERED_VAR: &str = "PYTHONUNBUFFERED";

/// Deadline for a single request, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Interval between heartbeat health checks while connected, in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;

/// Grace period before the first handshake health check, in milliseconds.
pub const DEFAULT_HANDSHAKE_GRACE_MS: u64 = 2_000;

/// Interval between handshake health checks, in milliseconds.
pub const DEFAULT_HANDSHAKE_POLL_MS: u64 = 1_000;

/// Overall handshake budget, in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 30_000;

/// Consecutive reconnect attempts allowed before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// First reconnect backoff delay, in milliseconds.
pub const DEFAULT_RECONNECT_INITIAL_DELAY_MS: u64 = 1_000;

/// Ceiling for the reconnect backoff delay, in milliseconds.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Fixed wait after a crash before recovery begins, in milliseconds.
pub const DEFAULT_CRASH_RESTART_DELAY_MS: u64 = 2_000;

/// Budget for a graceful `shutdown` before the worker is killed, in milliseconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default interpreter command.
pub fn default_worker_command() -> String {
    DEFAULT_WORKER_COMMAND.to_owned()
}

/// Default worker entrypoint.
pub fn default_worker_entrypoint() -> String {
    DEFAULT_WORKER_ENTRYPOINT.to_owned()
}

/// Default worker root directory.
pub fn default_worker_root() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_WORKER_ROOT)
}

/// Default search-path environment variable.
pub fn default_search_path_var() -> String {
    DEFAULT_SEARCH_PATH_VAR.to_owned()
}

/// Default unbuffered-output environment variable.
pub fn default_unbuffered_var() -> String {
    DEFAULT_UNBUFFERED_VAR.to_owned()
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}
