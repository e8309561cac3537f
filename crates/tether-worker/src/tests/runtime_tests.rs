//! Request loop behaviour over an in-memory duplex pipe.

use std::time::Duration;

use async_trait::async_trait;
use rstest::rstest;
use serde_json::{Value, json};
use tether_protocol::{Message, NotificationMethod, RequestMethod};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use crate::{Notifier, RequestHandler, ServeOutcome, WorkerError, WorkerRuntime};

struct ScriptedHandler;

#[async_trait]
impl RequestHandler for ScriptedHandler {
    async fn handle(
        &self,
        method: RequestMethod,
        params: Value,
        notifier: &Notifier,
    ) -> Result<Value, String> {
        match method {
            RequestMethod::StartTask => {
                notifier
                    .notify(NotificationMethod::TaskProgress, json!({ "step": 1 }))
                    .map_err(|err| err.to_string())?;
                Ok(json!({ "started": true }))
            }
            RequestMethod::GetTaskStatus => {
                let delay = params.get("delayMs").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(params)
            }
            RequestMethod::ToolRequest => Err(String::from("tool failed")),
            _ => Ok(Value::Null),
        }
    }
}

struct Host {
    input: WriteHalf<DuplexStream>,
    output: Lines<BufReader<ReadHalf<DuplexStream>>>,
    serving: JoinHandle<Result<ServeOutcome, WorkerError>>,
}

impl Host {
    fn start() -> Self {
        let (host_end, worker_end) = tokio::io::duplex(4096);
        let (worker_read, worker_write) = tokio::io::split(worker_end);
        let runtime = WorkerRuntime::new(ScriptedHandler);
        let serving = tokio::spawn(async move { runtime.serve(worker_read, worker_write).await });
        let (host_read, host_write) = tokio::io::split(host_end);
        Self {
            input: host_write,
            output: BufReader::new(host_read).lines(),
            serving,
        }
    }

    async fn send(&mut self, line: &str) {
        self.input
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write request");
    }

    async fn receive(&mut self) -> Message {
        let line = tokio::time::timeout(Duration::from_secs(5), self.output.next_line())
            .await
            .expect("worker answered in time")
            .expect("read worker output")
            .expect("worker output open");
        Message::from_line(&line).expect("well-formed worker output")
    }

    async fn close(mut self) -> Result<ServeOutcome, WorkerError> {
        self.input.shutdown().await.expect("close input");
        drop(self.input);
        self.serving.await.expect("serve task")
    }
}

fn outcome(message: Message) -> (String, Result<Value, String>) {
    match message {
        Message::Response(response) => response.into_outcome(),
        other => panic!("expected a response, got {other:?}"),
    }
}

#[rstest]
#[tokio::test]
async fn answers_health_check_itself() {
    let mut host = Host::start();

    host.send(r#"{"id":"req_1","method":"health_check","params":{}}"#).await;

    let (id, result) = outcome(host.receive().await);
    assert_eq!(id, "req_1");
    assert_eq!(result, Ok(json!({ "status": "ok" })));
    assert_eq!(host.close().await.expect("serve"), ServeOutcome::EndOfInput);
}

#[rstest]
#[tokio::test]
async fn unknown_method_is_refused() {
    let mut host = Host::start();

    host.send(r#"{"id":"req_2","method":"teleport","params":{}}"#).await;

    let (id, result) = outcome(host.receive().await);
    assert_eq!(id, "req_2");
    assert_eq!(result, Err(String::from("Unknown method: teleport")));
}

#[rstest]
#[tokio::test]
async fn handler_errors_become_error_responses() {
    let mut host = Host::start();

    host.send(r#"{"id":"req_3","method":"tool_request","params":{}}"#).await;

    let (_, result) = outcome(host.receive().await);
    assert_eq!(result, Err(String::from("tool failed")));
}

#[rstest]
#[tokio::test]
async fn notifications_precede_their_response() {
    let mut host = Host::start();

    host.send(r#"{"id":"req_4","method":"start_task","params":{}}"#).await;

    match host.receive().await {
        Message::Notification(notification) => {
            assert_eq!(notification.method(), Some(NotificationMethod::TaskProgress));
            assert_eq!(notification.params(), &json!({ "step": 1 }));
        }
        other => panic!("expected a notification, got {other:?}"),
    }
    let (id, result) = outcome(host.receive().await);
    assert_eq!(id, "req_4");
    assert_eq!(result, Ok(json!({ "started": true })));
}

#[rstest]
#[tokio::test]
async fn slow_requests_do_not_block_fast_ones() {
    let mut host = Host::start();

    host.send(r#"{"id":"slow","method":"get_task_status","params":{"delayMs":300}}"#).await;
    host.send(r#"{"id":"fast","method":"get_task_status","params":{"delayMs":0}}"#).await;

    let (first, _) = outcome(host.receive().await);
    let (second, second_result) = outcome(host.receive().await);
    assert_eq!(first, "fast");
    assert_eq!(second, "slow");
    assert_eq!(second_result, Ok(json!({ "delayMs": 300 })));
}

#[rstest]
#[tokio::test]
async fn malformed_lines_are_skipped() {
    let mut host = Host::start();

    host.send("this is not json").await;
    host.send("").await;
    host.send(r#"{"method":"log_message","params":{}}"#).await;
    host.send(r#"{"id":"req_5","method":"list_tasks","params":{}}"#).await;

    let (id, result) = outcome(host.receive().await);
    assert_eq!(id, "req_5");
    assert_eq!(result, Ok(Value::Null));
}

#[rstest]
#[tokio::test]
async fn shutdown_is_acknowledged_and_stops_serving() {
    let mut host = Host::start();

    host.send(r#"{"id":"req_6","method":"shutdown","params":{}}"#).await;

    let (id, result) = outcome(host.receive().await);
    assert_eq!(id, "req_6");
    assert_eq!(result, Ok(json!({ "status": "shutting_down" })));
    let served = tokio::time::timeout(Duration::from_secs(5), host.serving)
        .await
        .expect("runtime stopped")
        .expect("serve task");
    assert_eq!(served.expect("serve"), ServeOutcome::Shutdown);
}

#[rstest]
#[tokio::test]
async fn end_of_input_lets_in_flight_work_finish() {
    let mut host = Host::start();

    host.send(r#"{"id":"req_7","method":"get_task_status","params":{"delayMs":100}}"#).await;
    host.input.shutdown().await.expect("close input");

    let (id, _) = outcome(host.receive().await);
    assert_eq!(id, "req_7");
    assert_eq!(host.close().await.expect("serve"), ServeOutcome::EndOfInput);
}
