//! Request handling of the stub worker.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tether_protocol::{NotificationMethod, RequestMethod};
use tether_worker::{Notifier, RequestHandler, ServeOutcome, WorkerError, WorkerRuntime};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::plan::StubPlan;

/// Log target of the stub worker.
pub const STUB_TARGET: &str = "tether_stub_worker";

const FORWARD_BUFFER: usize = 64 * 1024;

/// Answers every worker method with predictable data.
///
/// `get_task_status` sleeps for `delayMs` and echoes its parameters,
/// `start_task` reports progress before completing, and `tool_request`
/// always fails.
#[derive(Debug, Clone, Default)]
pub struct StubHandler {
    progress_steps: u32,
}

impl StubHandler {
    /// Creates a handler following `plan`.
    #[must_use]
    pub const fn new(plan: &StubPlan) -> Self {
        Self {
            progress_steps: plan.progress_steps,
        }
    }

    fn start_task(&self, params: &Value, notifier: &Notifier) -> Result<Value, String> {
        let task_id = params
            .get("taskId")
            .and_then(Value::as_str)
            .unwrap_or("task")
            .to_owned();
        for step in 1..=self.progress_steps {
            notifier
                .notify(
                    NotificationMethod::TaskProgress,
                    json!({ "taskId": task_id, "step": step }),
                )
                .map_err(|err| err.to_string())?;
        }
        notifier
            .notify(
                NotificationMethod::TaskCompleted,
                json!({ "taskId": task_id }),
            )
            .map_err(|err| err.to_string())?;
        Ok(json!({ "taskId": task_id, "status": "started" }))
    }
}

#[async_trait]
impl RequestHandler for StubHandler {
    async fn handle(
        &self,
        method: RequestMethod,
        params: Value,
        notifier: &Notifier,
    ) -> Result<Value, String> {
        match method {
            RequestMethod::StartTask => self.start_task(&params, notifier),
            RequestMethod::StopTask => Ok(json!({ "stopped": true })),
            RequestMethod::GetTaskStatus => {
                let delay = params.get("delayMs").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(params)
            }
            RequestMethod::ListTasks => Ok(json!({ "tasks": [] })),
            RequestMethod::LlmRequest => Ok(json!({ "echo": params })),
            RequestMethod::ToolRequest => {
                let tool = params.get("tool").and_then(Value::as_str).unwrap_or("unknown");
                Err(format!("tool failed: {tool}"))
            }
            RequestMethod::HealthCheck | RequestMethod::Shutdown => Ok(Value::Null),
        }
    }
}

/// Runs the stub over the process's standard streams.
///
/// # Errors
///
/// Returns the runtime's error when the streams fail.
pub async fn run(plan: StubPlan) -> Result<ServeOutcome, WorkerError> {
    if let Some(banner) = &plan.stderr_banner {
        warn!(target: STUB_TARGET, "{banner}");
    }
    match plan.crash_after_ms {
        Some(0) => {
            info!(target: STUB_TARGET, code = plan.exit_code, "crashing before serving");
            std::process::exit(plan.exit_code);
        }
        Some(delay) => {
            let code = plan.exit_code;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                info!(target: STUB_TARGET, code, "crashing as scripted");
                std::process::exit(code);
            });
        }
        None => {}
    }
    if plan.silent {
        info!(target: STUB_TARGET, "staying silent");
        std::future::pending::<()>().await;
    }

    let runtime = WorkerRuntime::new(StubHandler::new(&plan));
    let outcome = if plan.filters_input() {
        let (requests, forwarded) = tokio::io::duplex(FORWARD_BUFFER);
        let gate = plan.clone();
        tokio::spawn(async move {
            if let Err(err) = forward_lines(tokio::io::stdin(), forwarded, &gate).await {
                warn!(target: STUB_TARGET, error = %err, "request forwarding failed");
            }
        });
        runtime.serve(requests, tokio::io::stdout()).await?
    } else {
        runtime.serve(tokio::io::stdin(), tokio::io::stdout()).await?
    };
    if outcome == ServeOutcome::Shutdown && plan.ignore_shutdown {
        info!(target: STUB_TARGET, "ignoring shutdown");
        std::future::pending::<()>().await;
    }
    Ok(outcome)
}

/// Copies request lines from `input` to `output`, dropping those the plan
/// leaves unanswered. Ends when `input` does.
async fn forward_lines<R, W>(input: R, mut output: W, plan: &StubPlan) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut seen: u32 = 0;
    while let Some(line) = lines.next_line().await? {
        seen = seen.saturating_add(1);
        if !plan.answers_line(seen) {
            debug!(target: STUB_TARGET, line = seen, "dropping request line");
            continue;
        }
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }
    output.shutdown().await
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn status_echoes_parameters() {
        let (output, _lines) = tokio::sync::mpsc::unbounded_channel();
        let notifier = Notifier::new(output);
        let handler = StubHandler::default();

        let result = handler
            .handle(RequestMethod::GetTaskStatus, json!({ "taskId": "t1" }), &notifier)
            .await;

        assert_eq!(result, Ok(json!({ "taskId": "t1" })));
    }

    #[rstest]
    #[tokio::test]
    async fn tool_requests_fail_with_the_tool_name() {
        let (output, _lines) = tokio::sync::mpsc::unbounded_channel();
        let notifier = Notifier::new(output);

        let result = StubHandler::default()
            .handle(RequestMethod::ToolRequest, json!({ "tool": "search" }), &notifier)
            .await;

        assert_eq!(result, Err(String::from("tool failed: search")));
    }

    #[rstest]
    #[tokio::test]
    async fn start_task_reports_each_step() {
        let (output, mut lines) = tokio::sync::mpsc::unbounded_channel();
        let notifier = Notifier::new(output);
        let plan = StubPlan {
            progress_steps: 2,
            ..StubPlan::default()
        };

        let result = StubHandler::new(&plan)
            .handle(RequestMethod::StartTask, json!({ "taskId": "t9" }), &notifier)
            .await;

        assert_eq!(result, Ok(json!({ "taskId": "t9", "status": "started" })));
        let mut sent = Vec::new();
        while let Ok(line) = lines.try_recv() {
            sent.push(line);
        }
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().take(2).all(|line| line.contains("task_progress")));
        assert!(sent.last().is_some_and(|line| line.contains("task_completed")));
    }

    #[rstest]
    #[tokio::test]
    async fn forwarding_drops_the_lines_the_plan_skips() {
        let plan = StubPlan {
            ignore_first_lines: 1,
            stop_after_lines: Some(3),
            ..StubPlan::default()
        };
        let input: &[u8] = b"one\ntwo\nthree\nfour\n";
        let mut output = Vec::new();

        forward_lines(input, &mut output, &plan).await.expect("forward lines");

        assert_eq!(output, b"two\nthree\n");
    }
}
