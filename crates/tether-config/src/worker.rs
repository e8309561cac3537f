//! Derives the concrete launch parameters for the worker process.
//!
//! The configuration names the interpreter, the entrypoint script and the
//! worker root. Launching needs absolute paths and the extra environment the
//! worker expects, so the supervisor resolves a [`WorkerLaunch`] immediately
//! before every spawn.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

/// Launch parameters derived from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLaunch {
    command: PathBuf,
    entrypoint: PathBuf,
    working_dir: PathBuf,
    environment: Vec<(String, String)>,
}

impl WorkerLaunch {
    /// Resolves launch parameters, anchoring relative roots at the current directory.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerLaunchError::CurrentDirectory`] when the current
    /// directory cannot be read, and [`WorkerLaunchError::MissingRoot`] when
    /// the resolved worker root is not a directory.
    pub fn from_config(config: &Config) -> Result<Self, WorkerLaunchError> {
        let base = env::current_dir().map_err(WorkerLaunchError::CurrentDirectory)?;
        Self::resolve_against(config, &base)
    }

    /// Resolves launch parameters against an explicit base directory.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerLaunchError::MissingRoot`] when the resolved worker
    /// root is not a directory.
    pub fn resolve_against(config: &Config, base: &Path) -> Result<Self, WorkerLaunchError> {
        let root = config.worker_root.as_std_path();
        let working_dir = if root.is_absolute() {
            root.to_path_buf()
        } else {
            base.join(root)
        };

        if !working_dir.is_dir() {
            return Err(WorkerLaunchError::MissingRoot { path: working_dir });
        }

        let entrypoint = working_dir.join(&config.worker_entrypoint);
        let root_value = working_dir.display().to_string();
        let environment = vec![
            (config.search_path_var.clone(), root_value),
            (config.unbuffered_var.clone(), String::from("1")),
        ];

        Ok(Self {
            command: PathBuf::from(&config.worker_command),
            entrypoint,
            working_dir,
            environment,
        })
    }

    /// Interpreter or executable to spawn.
    #[must_use]
    pub fn command(&self) -> &Path {
        self.command.as_path()
    }

    /// Script passed as the first argument.
    #[must_use]
    pub fn entrypoint(&self) -> &Path {
        self.entrypoint.as_path()
    }

    /// Working directory of the worker.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        self.working_dir.as_path()
    }

    /// Variables added on top of the inherited environment.
    #[must_use]
    pub fn environment(&self) -> &[(String, String)] {
        &self.environment
    }
}

/// Errors raised while resolving worker launch parameters.
#[derive(Debug, Error)]
pub enum WorkerLaunchError {
    /// The current working directory could not be read.
    #[error("failed to read current directory: {0}")]
    CurrentDirectory(#[source] io::Error),
    /// The configured worker root does not exist.
    #[error("worker root '{}' is not a directory", path.display())]
    MissingRoot {
        /// Directory that was checked.
        path: PathBuf,
    },
}
