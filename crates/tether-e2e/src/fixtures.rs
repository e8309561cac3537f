//! Temporary worker roots wired to the stub worker.

use std::io;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use tempfile::TempDir;
use tether_config::Config;

use crate::plan::StubPlan;

/// File name of the plan inside the worker root.
pub const PLAN_FILE: &str = "plan.json";

/// A worker root holding a stub plan, plus a host configuration that
/// launches the stub against it with test-sized timings.
#[derive(Debug)]
pub struct StubWorkspace {
    dir: TempDir,
    config: Config,
}

impl StubWorkspace {
    /// Creates a workspace that runs `binary` with `plan`.
    ///
    /// Heartbeats are disabled; tests that need them switch them on through
    /// [`StubWorkspace::config_mut`].
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the temporary root cannot be prepared.
    pub fn new(binary: &Path, plan: &StubPlan) -> io::Result<Self> {
        let dir = TempDir::new()?;
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|path| io::Error::other(format!("non UTF-8 temp dir: {}", path.display())))?;
        plan.store(&dir.path().join(PLAN_FILE))?;

        let config = Config {
            worker_command: binary.display().to_string(),
            worker_entrypoint: String::from(PLAN_FILE),
            worker_root: root,
            request_timeout_ms: 5_000,
            heartbeat_interval_ms: 0,
            handshake_grace_ms: 0,
            handshake_poll_ms: 25,
            handshake_timeout_ms: 5_000,
            reconnect_initial_delay_ms: 50,
            reconnect_max_delay_ms: 400,
            crash_restart_delay_ms: 50,
            shutdown_timeout_ms: 2_000,
            ..Config::default()
        };
        Ok(Self { dir, config })
    }

    /// Replaces the plan the next worker launch will read.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn rewrite_plan(&self, plan: &StubPlan) -> io::Result<()> {
        plan.store(&self.plan_path())
    }

    /// Location of the plan file.
    #[must_use]
    pub fn plan_path(&self) -> PathBuf {
        self.dir.path().join(PLAN_FILE)
    }

    /// Host configuration for this workspace.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Mutable access for tests that tune timings.
    pub const fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }
}
