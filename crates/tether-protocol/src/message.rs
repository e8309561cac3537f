//! Wire message shapes exchanged with the worker.
//!
//! Every line on the wire is one JSON object. The three shapes carry no
//! explicit discriminator, so [`Message::from_value`] classifies them by the
//! fields present: `id` and `method` make a request, `id` alone a response,
//! `method` alone a notification.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::method::{NotificationMethod, RequestMethod};

/// Milliseconds since the Unix epoch, saturating on clock anomalies.
#[must_use]
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A request sent from the extension to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    id: String,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
}

impl Request {
    /// Creates a request stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>, method: RequestMethod, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.as_str().to_owned(),
            params,
            timestamp: Some(timestamp_millis()),
        }
    }

    /// Correlation id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Raw method name as written on the wire.
    #[must_use]
    pub fn method_name(&self) -> &str {
        self.method.as_str()
    }

    /// Recognised method, or `None` for names outside the protocol.
    #[must_use]
    pub fn method(&self) -> Option<RequestMethod> {
        self.method.parse().ok()
    }

    /// Opaque parameters.
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// Send time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }
}

/// The worker's answer to exactly one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
}

impl Response {
    /// Creates a successful response.
    #[must_use]
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
            timestamp: Some(timestamp_millis()),
        }
    }

    /// Creates a failed response.
    #[must_use]
    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error.into()),
            timestamp: Some(timestamp_millis()),
        }
    }

    /// Correlation id of the originating request.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Result payload on success.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Error text reported by the worker.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Send time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// Splits the response into its id and outcome.
    ///
    /// An `error` field wins over `result`; a success without `result`
    /// yields JSON `null`.
    #[must_use]
    pub fn into_outcome(self) -> (String, Result<Value, String>) {
        let outcome = match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        };
        (self.id, outcome)
    }
}

/// Uncorrelated push message from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
}

impl Notification {
    /// Creates a notification stamped with the current time.
    #[must_use]
    pub fn new(method: NotificationMethod, params: Value) -> Self {
        Self {
            method: method.as_str().to_owned(),
            params,
            timestamp: Some(timestamp_millis()),
        }
    }

    /// Raw method name as written on the wire.
    #[must_use]
    pub fn method_name(&self) -> &str {
        self.method.as_str()
    }

    /// Recognised notification kind, or `None` for unknown names.
    #[must_use]
    pub fn method(&self) -> Option<NotificationMethod> {
        self.method.parse().ok()
    }

    /// Opaque parameters.
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// Consumes the notification, returning its parameters.
    #[must_use]
    pub fn into_params(self) -> Value {
        self.params
    }

    /// Send time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }
}

/// Any message that may appear on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Extension → worker request.
    Request(Request),
    /// Worker → extension response.
    Response(Response),
    /// Worker → extension notification.
    Notification(Notification),
}

impl Message {
    /// Classifies and decodes a parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(map) = value else {
            return Err(ProtocolError::malformed(
                value.to_string(),
                "message is not a JSON object",
            ));
        };

        match (map.contains_key("id"), map.contains_key("method")) {
            (true, true) => decode(map).map(Self::Request),
            (true, false) => decode(map).map(Self::Response),
            (false, true) => decode(map).map(Self::Notification),
            (false, false) => Err(ProtocolError::malformed(
                Value::Object(map).to_string(),
                "message has neither an id nor a method",
            )),
        }
    }

    /// Parses one trimmed, non-empty line.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MalformedMessage`] for invalid JSON, non-objects and
    /// objects matching none of the three shapes.
    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(line).map_err(|err| ProtocolError::MalformedMessage {
                line: line.to_owned(),
                message: format!("invalid JSON: {err}"),
                source: Some(err.into()),
            })?;
        Self::from_value(value)
    }

    /// Serialises the message as one newline-terminated line.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        encode_line(self)
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Notification> for Message {
    fn from(notification: Notification) -> Self {
        Self::Notification(notification)
    }
}

/// Serialises any protocol value as one newline-terminated JSON line.
///
/// # Errors
///
/// [`ProtocolError::Encode`] when serialisation fails.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let mut line =
        serde_json::to_string(value).map_err(|err| ProtocolError::Encode(err.into()))?;
    line.push('\n');
    Ok(line)
}

fn decode<T>(map: Map<String, Value>) -> Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    let value = Value::Object(map);
    let line = value.to_string();
    serde_json::from_value(value).map_err(|err| ProtocolError::MalformedMessage {
        line,
        message: format!("unexpected message fields: {err}"),
        source: Some(err.into()),
    })
}
