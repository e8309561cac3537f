//! The request loop a worker runs over its standard streams.

use std::sync::Arc;

use serde_json::json;
use tether_protocol::{FramedReader, Message, Request, RequestMethod, Response};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::handler::{Notifier, RequestHandler};

/// Log target for the worker runtime.
pub const RUNTIME_TARGET: &str = "tether_worker::runtime";

/// Why [`WorkerRuntime::serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The host asked the worker to shut down.
    Shutdown,
    /// The host closed the request stream.
    EndOfInput,
}

/// Drives a [`RequestHandler`] from a line-delimited request stream.
#[derive(Debug)]
pub struct WorkerRuntime<H> {
    handler: Arc<H>,
}

impl<H> Clone for WorkerRuntime<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<H: RequestHandler> WorkerRuntime<H> {
    /// Wraps `handler`.
    #[must_use]
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Serves requests from `reader`, writing every line to `writer`.
    ///
    /// Requests are dispatched concurrently; responses leave in completion
    /// order. On `shutdown` the acknowledgement is written and in-flight
    /// work is abandoned. At end of input in-flight work is allowed to
    /// finish first. Handlers must not hold on to their [`Notifier`] past
    /// the request they were given it for, or the writer never drains.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Read`] when the request stream fails and
    /// [`WorkerError::Write`] when the output cannot be written.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<ServeOutcome, WorkerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (output, lines) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_lines(writer, lines));
        let notifier = Notifier::new(output);
        let mut in_flight = JoinSet::new();
        let mut frames = FramedReader::new(reader);

        let outcome = loop {
            let Some(frame) = frames.next_frame().await else {
                break Ok(ServeOutcome::EndOfInput);
            };
            let request = match frame {
                Ok(Message::Request(request)) => request,
                Ok(other) => {
                    warn!(target: RUNTIME_TARGET, message = ?other, "ignoring non-request message");
                    continue;
                }
                Err(err) if err.is_malformed() => {
                    warn!(target: RUNTIME_TARGET, error = %err, "skipping malformed request line");
                    continue;
                }
                Err(err) => break Err(WorkerError::Read(err)),
            };

            if self.accept(request, &notifier, &mut in_flight) {
                break Ok(ServeOutcome::Shutdown);
            }
        };

        match outcome {
            Ok(ServeOutcome::EndOfInput) => while in_flight.join_next().await.is_some() {},
            _ => in_flight.shutdown().await,
        }
        drop(notifier);
        finish_writer(writer_task).await?;
        let served = outcome?;
        info!(target: RUNTIME_TARGET, outcome = ?served, "worker runtime stopped");
        Ok(served)
    }

    /// Answers or dispatches one request. Returns `true` once the runtime
    /// should stop reading.
    fn accept(&self, request: Request, notifier: &Notifier, in_flight: &mut JoinSet<()>) -> bool {
        let id = request.id().to_owned();
        let Some(method) = request.method() else {
            let name = request.method_name();
            warn!(target: RUNTIME_TARGET, %id, method = name, "unknown request method");
            reply(notifier, Response::failure(id, format!("Unknown method: {name}")));
            return false;
        };
        debug!(target: RUNTIME_TARGET, %id, method = %method.as_str(), "received request");

        match method {
            RequestMethod::HealthCheck => {
                reply(notifier, Response::success(id, json!({ "status": "ok" })));
                false
            }
            RequestMethod::Shutdown => {
                reply(
                    notifier,
                    Response::success(id, json!({ "status": "shutting_down" })),
                );
                true
            }
            _ => {
                let handler = Arc::clone(&self.handler);
                let task_notifier = notifier.clone();
                let params = request.params().clone();
                in_flight.spawn(async move {
                    let response = match handler.handle(method, params, &task_notifier).await {
                        Ok(result) => Response::success(id, result),
                        Err(message) => Response::failure(id, message),
                    };
                    reply(&task_notifier, response);
                });
                false
            }
        }
    }
}

fn reply(notifier: &Notifier, response: Response) {
    let id = response.id().to_owned();
    if let Err(err) = notifier.send(&Message::from(response)) {
        warn!(target: RUNTIME_TARGET, %id, error = %err, "failed to queue response");
    }
}

async fn write_lines<W>(
    mut writer: W,
    mut lines: mpsc::UnboundedReceiver<String>,
) -> Result<(), WorkerError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|err| WorkerError::Write(Arc::new(err)))?;
        writer
            .flush()
            .await
            .map_err(|err| WorkerError::Write(Arc::new(err)))?;
    }
    Ok(())
}

async fn finish_writer(task: JoinHandle<Result<(), WorkerError>>) -> Result<(), WorkerError> {
    task.await.map_err(|_| WorkerError::OutputClosed)?
}
