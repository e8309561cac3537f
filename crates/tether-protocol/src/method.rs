//! Closed sets of method names recognised on the wire.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Methods the extension may invoke on the worker.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestMethod {
    /// Starts a worker task.
    StartTask,
    /// Stops a running task.
    StopTask,
    /// Queries the status of one task.
    GetTaskStatus,
    /// Lists known tasks.
    ListTasks,
    /// Forwards a language-model request.
    LlmRequest,
    /// Forwards a tool invocation.
    ToolRequest,
    /// Liveness check used by the handshake and heartbeat.
    HealthCheck,
    /// Asks the worker to exit cleanly.
    Shutdown,
}

impl RequestMethod {
    /// Wire name of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Push notifications the worker may emit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationMethod {
    /// Incremental progress of a task.
    TaskProgress,
    /// A task finished successfully.
    TaskCompleted,
    /// A task failed.
    TaskFailed,
    /// Free-form log line from the worker.
    LogMessage,
    /// Worker-wide status change.
    StatusUpdate,
}

impl NotificationMethod {
    /// Wire name of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(RequestMethod::StartTask, "start_task")]
    #[case(RequestMethod::GetTaskStatus, "get_task_status")]
    #[case(RequestMethod::LlmRequest, "llm_request")]
    #[case(RequestMethod::HealthCheck, "health_check")]
    #[case(RequestMethod::Shutdown, "shutdown")]
    fn request_methods_use_snake_case(#[case] method: RequestMethod, #[case] wire: &str) {
        assert_eq!(method.as_str(), wire);
        assert_eq!(wire.parse::<RequestMethod>().expect("parse"), method);
        assert_eq!(
            serde_json::to_value(method).expect("serialise"),
            serde_json::Value::from(wire)
        );
    }

    #[rstest]
    #[case("task_progress", NotificationMethod::TaskProgress)]
    #[case("task_completed", NotificationMethod::TaskCompleted)]
    #[case("task_failed", NotificationMethod::TaskFailed)]
    #[case("log_message", NotificationMethod::LogMessage)]
    #[case("status_update", NotificationMethod::StatusUpdate)]
    fn notification_methods_parse(#[case] wire: &str, #[case] expected: NotificationMethod) {
        assert_eq!(wire.parse::<NotificationMethod>().expect("parse"), expected);
    }

    #[rstest]
    fn unknown_notification_method_is_rejected() {
        assert!("task_exploded".parse::<NotificationMethod>().is_err());
    }
}
