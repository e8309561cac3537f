//! Spawning the worker and wiring its standard streams.

use std::process::{ExitStatus, Stdio};

use tether_config::WorkerLaunch;
use tether_protocol::FramedReader;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::SUPERVISOR_TARGET;
use crate::connection::{ChannelSink, ConnectionManager};
use crate::error::ChannelError;

/// Log target carrying the worker's diagnostic stream verbatim.
pub const WORKER_STDERR_TARGET: &str = "tether_host::worker_stderr";

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerExit {
    pub(crate) code: Option<i32>,
    pub(crate) success: bool,
}

impl WorkerExit {
    const UNKNOWN: Self = Self {
        code: None,
        success: false,
    };
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
        }
    }
}

/// A running worker owned by the supervisor.
#[derive(Debug)]
pub(crate) struct WorkerProcess {
    pub(crate) pid: Option<u32>,
    pub(crate) generation: u64,
    pub(crate) started_at: Instant,
    kill: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<WorkerExit>>,
}

impl WorkerProcess {
    /// Requests a forced kill. Dropping the process has the same effect.
    pub(crate) fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    pub(crate) fn exit_watch(&self) -> watch::Receiver<Option<WorkerExit>> {
        self.exit.clone()
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

/// Waits until the process behind `exit` has ended.
pub(crate) async fn exited(mut exit: watch::Receiver<Option<WorkerExit>>) -> WorkerExit {
    loop {
        if let Some(status) = *exit.borrow_and_update() {
            return status;
        }
        if exit.changed().await.is_err() {
            return (*exit.borrow()).unwrap_or(WorkerExit::UNKNOWN);
        }
    }
}

/// Spawns the worker and starts its stream and monitor tasks.
///
/// Decoded stdout frames go straight to `connection`; the returned sink
/// feeds stdin.
pub(crate) fn spawn(
    launch: &WorkerLaunch,
    generation: u64,
    connection: &ConnectionManager,
) -> Result<(WorkerProcess, ChannelSink), ChannelError> {
    let label = launch.command().display().to_string();
    debug!(
        target: SUPERVISOR_TARGET,
        command = %label,
        entrypoint = %launch.entrypoint().display(),
        cwd = %launch.working_dir().display(),
        generation,
        "spawning worker process"
    );

    let mut command = Command::new(launch.command());
    command
        .arg(launch.entrypoint())
        .current_dir(launch.working_dir())
        .envs(launch.environment().iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|err| ChannelError::from_spawn(&label, err))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ChannelError::missing_pipe("stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ChannelError::missing_pipe("stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ChannelError::missing_pipe("stderr"))?;
    let pid = child.id();

    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let (kill_tx, kill_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = watch::channel(None);

    tokio::spawn(write_lines(stdin, line_rx, pid));
    tokio::spawn(read_frames(stdout, connection.clone(), pid));
    tokio::spawn(forward_stderr(stderr, pid));
    tokio::spawn(monitor(child, kill_rx, exit_tx, pid));

    let process = WorkerProcess {
        pid,
        generation,
        started_at: Instant::now(),
        kill: Some(kill_tx),
        exit: exit_rx,
    };
    Ok((process, ChannelSink::new(line_tx)))
}

async fn write_lines(
    mut stdin: ChildStdin,
    mut lines: mpsc::UnboundedReceiver<String>,
    pid: Option<u32>,
) {
    while let Some(line) = lines.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };
        if let Err(err) = written.await {
            warn!(target: SUPERVISOR_TARGET, ?pid, error = %err, "failed to write to worker stdin");
            break;
        }
    }
    debug!(target: SUPERVISOR_TARGET, ?pid, "worker stdin writer finished");
}

async fn read_frames(stdout: ChildStdout, connection: ConnectionManager, pid: Option<u32>) {
    let mut frames = FramedReader::new(stdout);
    while let Some(frame) = frames.next_frame().await {
        match frame {
            Ok(message) => connection.handle_message(message),
            Err(err) if err.is_malformed() => {
                warn!(target: SUPERVISOR_TARGET, ?pid, error = %err, "dropping malformed worker output");
            }
            Err(err) => {
                warn!(target: SUPERVISOR_TARGET, ?pid, error = %err, "worker stdout failed");
                break;
            }
        }
    }
    debug!(target: SUPERVISOR_TARGET, ?pid, "worker stdout closed");
}

async fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.trim().is_empty() {
                    error!(target: WORKER_STDERR_TARGET, ?pid, "{line}");
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(target: SUPERVISOR_TARGET, ?pid, error = %err, "worker stderr failed");
                break;
            }
        }
    }
}

async fn monitor(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exit: watch::Sender<Option<WorkerExit>>,
    pid: Option<u32>,
) {
    let waited = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            debug!(target: SUPERVISOR_TARGET, ?pid, "killing worker process");
            if let Err(err) = child.start_kill() {
                warn!(target: SUPERVISOR_TARGET, ?pid, error = %err, "failed to kill worker process");
            }
            child.wait().await
        }
    };

    let outcome = match waited {
        Ok(status) => WorkerExit::from(status),
        Err(err) => {
            warn!(target: SUPERVISOR_TARGET, ?pid, error = %err, "failed to wait for worker process");
            WorkerExit::UNKNOWN
        }
    };
    debug!(target: SUPERVISOR_TARGET, ?pid, code = ?outcome.code, "worker process ended");
    let _ = exit.send(Some(outcome));
}
