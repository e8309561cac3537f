//! Scripted behaviour of the stub worker.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the stub worker does besides answering requests.
///
/// Every field defaults to the well-behaved choice, so `StubPlan::default()`
/// is a worker that simply echoes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StubPlan {
    /// Exit abruptly this many milliseconds after starting.
    pub crash_after_ms: Option<u64>,
    /// Exit code used by a scripted crash.
    pub exit_code: i32,
    /// Acknowledge `shutdown` but keep the process alive.
    pub ignore_shutdown: bool,
    /// Never read or answer anything.
    pub silent: bool,
    /// `task_progress` notifications emitted before `start_task` completes.
    pub progress_steps: u32,
    /// Line written to the diagnostic stream at start-up.
    pub stderr_banner: Option<String>,
    /// Read but never answer this many leading request lines.
    pub ignore_first_lines: u32,
    /// Answer nothing after this many request lines have arrived.
    pub stop_after_lines: Option<u32>,
}

impl StubPlan {
    /// Reads a plan from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] when the file is unreadable or not a plan.
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let text = fs::read_to_string(path).map_err(|err| PlanError::Read {
            path: path.to_path_buf(),
            source: Arc::new(err),
        })?;
        serde_json::from_str(&text).map_err(|err| PlanError::Parse {
            path: path.to_path_buf(),
            source: Arc::new(err),
        })
    }

    /// Whether the request line at 1-based position `line` reaches the
    /// handler.
    #[must_use]
    pub fn answers_line(&self, line: u32) -> bool {
        line > self.ignore_first_lines && self.stop_after_lines.is_none_or(|limit| line <= limit)
    }

    /// Whether any request lines are held back from the handler.
    #[must_use]
    pub const fn filters_input(&self) -> bool {
        self.ignore_first_lines > 0 || self.stop_after_lines.is_some()
    }

    /// Writes the plan as JSON.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn store(&self, path: &Path) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, text)
    }
}

/// Failures loading a [`StubPlan`].
#[derive(Debug, Clone, Error)]
pub enum PlanError {
    /// The plan file could not be read.
    #[error("failed to read stub plan '{}': {source}", path.display())]
    Read {
        /// Plan location.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The plan file is not valid plan JSON.
    #[error("invalid stub plan '{}': {source}", path.display())]
    Parse {
        /// Plan location.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: Arc<serde_json::Error>,
    },
}
