//! Unit tests for the connection manager.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use mockall::mock;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tether_protocol::{Message, Notification, NotificationMethod, Request, RequestMethod, Response};
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use super::{ConnectionManager, ConnectionSettings, Inner, WorkerSink};
use crate::error::ChannelError;
use crate::events::ChannelEvent;
use crate::state::ConnectionState;

mock! {
    Sink {}
    impl WorkerSink for Sink {
        fn send_line(&self, line: String) -> Result<(), ChannelError>;
    }
}

/// Captures every line written to the worker.
#[derive(Default)]
struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn requests(&self) -> Vec<Request> {
        self.lines
            .lock()
            .expect("lines lock")
            .iter()
            .map(|line| match Message::from_line(line.trim()).expect("valid line") {
                Message::Request(request) => request,
                other => panic!("expected request, got {other:?}"),
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.lines.lock().expect("lines lock").len()
    }
}

impl WorkerSink for RecordingSink {
    fn send_line(&self, line: String) -> Result<(), ChannelError> {
        self.lines.lock().expect("lines lock").push(line);
        Ok(())
    }
}

/// Answers every request immediately with `{"echo": <method>}`.
struct EchoSink {
    manager: Weak<Inner>,
}

impl WorkerSink for EchoSink {
    fn send_line(&self, line: String) -> Result<(), ChannelError> {
        let Some(inner) = self.manager.upgrade() else {
            return Err(ChannelError::ChannelClosed);
        };
        let manager = ConnectionManager { inner };
        if let Message::Request(request) = Message::from_line(line.trim())? {
            let reply = Response::success(request.id(), json!({ "echo": request.method_name() }));
            manager.handle_message(Message::from(reply));
        }
        Ok(())
    }
}

fn settings() -> ConnectionSettings {
    ConnectionSettings {
        request_timeout: Duration::from_secs(30),
        heartbeat_interval: Duration::from_secs(10),
        max_reconnect_attempts: 5,
        reconnect_initial_delay: Duration::from_secs(1),
        reconnect_max_delay: Duration::from_secs(30),
    }
}

#[fixture]
fn manager() -> ConnectionManager {
    ConnectionManager::new(settings())
}

fn connect_recording(manager: &ConnectionManager) -> Arc<RecordingSink> {
    let sink = Arc::new(RecordingSink::default());
    manager.attach(sink.clone());
    manager.set_state(ConnectionState::Connected);
    sink
}

fn connect_echo(manager: &ConnectionManager) {
    manager.attach(Arc::new(EchoSink {
        manager: Arc::downgrade(&manager.inner),
    }));
    manager.set_state(ConnectionState::Connected);
}

async fn wait_for_lines(sink: &RecordingSink, count: usize) {
    for _ in 0..1_000 {
        if sink.len() >= count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("expected {count} lines, saw {}", sink.len());
}

fn drain(events: &mut broadcast::Receiver<ChannelEvent>) -> Vec<ChannelEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn requests_require_connected_state(manager: ConnectionManager) {
    let error = manager
        .send_request(RequestMethod::ListTasks, json!({}))
        .await
        .expect_err("not connected");

    assert!(matches!(
        error,
        ChannelError::NotConnected {
            state: ConnectionState::Disconnected
        }
    ));
    assert_eq!(manager.pending_requests(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn concurrent_requests_match_out_of_order_responses(manager: ConnectionManager) {
    let sink = connect_recording(&manager);
    let calls: Vec<_> = (0..5)
        .map(|n| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .send_request(RequestMethod::GetTaskStatus, json!({ "task": n }))
                    .await
            })
        })
        .collect();

    wait_for_lines(&sink, 5).await;
    for request in sink.requests().into_iter().rev() {
        let reply = Response::success(request.id(), request.params().clone());
        manager.handle_message(Message::from(reply));
    }

    for (n, call) in calls.into_iter().enumerate() {
        let result = call.await.expect("task joined").expect("request succeeded");
        assert_eq!(result, json!({ "task": n }));
    }
    assert_eq!(manager.pending_requests(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn worker_error_rejects_request(manager: ConnectionManager) {
    let sink = connect_recording(&manager);
    let call = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.send_request(RequestMethod::ToolRequest, json!({})).await })
    };

    wait_for_lines(&sink, 1).await;
    let request = sink.requests().remove(0);
    manager.handle_response(Response::failure(request.id(), "no such tool"));

    let error = call.await.expect("joined").expect_err("worker error");
    assert!(matches!(
        error,
        ChannelError::WorkerReported { ref message, ref method, .. }
            if message == "no such tool" && method == "tool_request"
    ));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn timed_out_request_ignores_late_response(manager: ConnectionManager) {
    let sink = connect_recording(&manager);
    manager.stop_heartbeat();

    let error = manager
        .send_request(RequestMethod::StartTask, json!({}))
        .await
        .expect_err("timeout");
    assert!(matches!(error, ChannelError::RequestTimeout { ref method, .. } if method == "start_task"));

    let request = sink.requests().remove(0);
    manager.handle_response(Response::success(request.id(), json!("late")));
    assert_eq!(manager.pending_requests(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn reset_connection_rejects_every_pending_request(manager: ConnectionManager) {
    let sink = connect_recording(&manager);
    let calls: Vec<_> = (0..3)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send_request(RequestMethod::ListTasks, json!({})).await })
        })
        .collect();
    wait_for_lines(&sink, 3).await;

    manager.reset_connection();

    assert_eq!(manager.pending_requests(), 0);
    for call in calls {
        let error = call.await.expect("joined").expect_err("reset");
        assert!(matches!(error, ChannelError::ConnectionReset));
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn notifications_become_typed_events(manager: ConnectionManager) {
    let mut events = manager.subscribe();

    manager.handle_message(Message::from(Notification::new(
        NotificationMethod::TaskProgress,
        json!({ "pct": 50 }),
    )));
    manager.handle_message(
        Message::from_line(r#"{"method":"task_exploded","params":{}}"#).expect("parse"),
    );
    manager.handle_message(
        Message::from_line(r#"{"method":"task_completed","params":{"task":"t1"}}"#)
            .expect("parse"),
    );

    let received: Vec<(NotificationMethod, Value)> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            ChannelEvent::Notification(notification) => {
                Some((notification.kind(), notification.params().clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        received,
        vec![
            (NotificationMethod::TaskProgress, json!({ "pct": 50 })),
            (NotificationMethod::TaskCompleted, json!({ "task": "t1" })),
        ]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn transitions_emit_state_and_lifecycle_events(manager: ConnectionManager) {
    let mut events = manager.subscribe();

    manager.set_state(ConnectionState::Connecting);
    manager.set_state(ConnectionState::Connected);
    manager.set_state(ConnectionState::Connected);
    manager.set_state(ConnectionState::Disconnected);

    assert_eq!(
        drain(&mut events),
        vec![
            ChannelEvent::StateChanged(ConnectionState::Connecting),
            ChannelEvent::StateChanged(ConnectionState::Connected),
            ChannelEvent::Connected,
            ChannelEvent::StateChanged(ConnectionState::Disconnected),
            ChannelEvent::Disconnected,
        ]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn reconnect_backs_off_then_gives_up_once(manager: ConnectionManager) {
    let mut events = manager.subscribe();
    let started = Instant::now();

    for expected in 1..=5 {
        let attempt = manager.attempt_reconnect().await.expect("attempt allowed");
        assert_eq!(attempt, expected);
    }
    assert_eq!(started.elapsed(), Duration::from_secs(1 + 2 + 4 + 8 + 16));

    for _ in 0..2 {
        let error = manager.attempt_reconnect().await.expect_err("exhausted");
        assert!(matches!(error, ChannelError::ReconnectLimitExceeded { attempts: 5 }));
    }
    assert_eq!(manager.state(), ConnectionState::Error);
    assert!(manager.is_exhausted());

    let observed = drain(&mut events);
    let attempts: Vec<u32> = observed
        .iter()
        .filter_map(|event| match event {
            ChannelEvent::ReconnectAttempt { attempt } => Some(*attempt),
            _ => None,
        })
        .collect();
    let exhausted = observed
        .iter()
        .filter(|event| matches!(event, ChannelEvent::ReconnectExhausted { attempts: 5 }))
        .count();
    assert_eq!(attempts, vec![1, 2, 3, 4, 5]);
    assert_eq!(exhausted, 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn connecting_resets_backoff(manager: ConnectionManager) {
    manager.attempt_reconnect().await.expect("first attempt");
    manager.attempt_reconnect().await.expect("second attempt");
    assert_eq!(manager.reconnect_attempts(), 2);

    connect_recording(&manager);

    assert_eq!(manager.reconnect_attempts(), 0);
    let started = Instant::now();
    assert_eq!(manager.attempt_reconnect().await.expect("fresh attempt"), 1);
    assert_eq!(started.elapsed(), Duration::from_secs(1));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn reset_connection_clears_exhaustion(manager: ConnectionManager) {
    for _ in 0..6 {
        let _ = manager.attempt_reconnect().await;
    }
    assert!(manager.is_exhausted());

    manager.reset_connection();

    assert!(!manager.is_exhausted());
    assert_eq!(manager.reconnect_attempts(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn heartbeat_refreshes_last_heartbeat(manager: ConnectionManager) {
    connect_echo(&manager);
    let connected_at = manager.last_heartbeat().expect("recorded on connect");

    time::sleep(Duration::from_secs(25)).await;

    let last = manager.last_heartbeat().expect("heartbeat recorded");
    assert!(last >= connected_at + Duration::from_secs(20));
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn unanswered_heartbeat_moves_to_error(manager: ConnectionManager) {
    let mut events = manager.subscribe();
    let sink = connect_recording(&manager);

    time::sleep(Duration::from_secs(10 + 30 + 1)).await;

    assert_eq!(manager.state(), ConnectionState::Error);
    let observed = drain(&mut events);
    assert!(
        observed
            .iter()
            .any(|event| matches!(event, ChannelEvent::HeartbeatFailed { .. })),
        "events: {observed:?}"
    );
    let methods: Vec<String> = sink
        .requests()
        .iter()
        .map(|request| request.method_name().to_owned())
        .collect();
    assert_eq!(methods, vec!["health_check"]);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn sink_failure_leaves_nothing_pending(manager: ConnectionManager) {
    let mut sink = MockSink::new();
    sink.expect_send_line()
        .once()
        .returning(|_| Err(ChannelError::ChannelClosed));
    manager.attach(Arc::new(sink));
    manager.set_state(ConnectionState::Connected);
    manager.stop_heartbeat();

    let error = manager
        .send_request(RequestMethod::StopTask, json!({ "task": "t" }))
        .await
        .expect_err("sink closed");

    assert!(matches!(error, ChannelError::ChannelClosed));
    assert_eq!(manager.pending_requests(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn detached_manager_fails_fast(manager: ConnectionManager) {
    connect_recording(&manager);
    manager.stop_heartbeat();
    manager.detach();

    let error = manager
        .send_request(RequestMethod::ListTasks, json!({}))
        .await
        .expect_err("no sink");

    assert!(matches!(error, ChannelError::ChannelClosed));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn request_lines_carry_id_method_and_params(manager: ConnectionManager) {
    let sink = connect_recording(&manager);
    manager.stop_heartbeat();
    let call = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .send_request(RequestMethod::LlmRequest, json!({ "prompt": "hi" }))
                .await
        })
    };
    wait_for_lines(&sink, 1).await;

    let request = sink.requests().remove(0);
    assert!(request.id().starts_with("req_"));
    assert_eq!(request.method(), Some(RequestMethod::LlmRequest));
    assert_eq!(request.params(), &json!({ "prompt": "hi" }));
    assert!(request.timestamp().is_some());

    manager.handle_response(Response::success(request.id(), Value::Null));
    assert_eq!(call.await.expect("joined").expect("ok"), Value::Null);
}
