//! Wire types for both sides of the bridge.
//!
//! Front-end side: `{id, method, params}` requests in, `{id, result}` responses
//! and `{method, params}` events out.
//!
//! Debuggee side: `{seq, type: "request", command, arguments}` commands out,
//! `{request_seq, type: "response", command, body, success}` responses and
//! `{type: "event", event, body}` events in.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{BridgeError, Result};

// ── Front-end ───────────────────────────────────────────────────────────────

/// A request from the front-end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrontendRequest {
    /// Client-chosen id, echoed back in the response.
    pub id: u64,
    /// Method name, e.g. `Runtime.evaluate`.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl FrontendRequest {
    /// Parse a front-end text message.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Look up a single parameter by name.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.as_ref()?.get(key)
    }
}

/// Error body sent to the front-end in place of a result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Short machine-readable classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable description.
    pub message: String,
}

/// A message sent to the front-end.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FrontendMessage {
    /// Successful reply to a request.
    Response {
        /// Id of the originating request.
        id: u64,
        /// Result payload, omitted when the debuggee sent no body.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    /// Failed reply to a request.
    Error {
        /// Id of the originating request.
        id: u64,
        /// Failure details.
        error: ErrorPayload,
    },
    /// Unsolicited notification.
    Event {
        /// Event name, e.g. `Debugger.paused`.
        method: String,
        /// Event payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
}

impl FrontendMessage {
    /// A successful response.
    pub fn response(id: u64, result: Option<Value>) -> Self {
        Self::Response { id, result }
    }

    /// A failed response.
    pub fn error(id: u64, code: Option<&str>, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            error: ErrorPayload {
                code: code.map(str::to_owned),
                message: message.into(),
            },
        }
    }

    /// A failed response built from a bridge error.
    pub fn from_error(id: u64, err: &BridgeError) -> Self {
        Self::error(id, Some(err.error_kind()), err.to_string())
    }

    /// An event notification.
    pub fn event(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Event {
            method: method.into(),
            params,
        }
    }

    /// Serialize to the text frame sent over the WebSocket.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize front-end message");
            String::new()
        })
    }
}

// ── Debuggee ────────────────────────────────────────────────────────────────

/// The `type` discriminator of debuggee messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Command sent to the debuggee.
    Request,
    /// Reply from the debuggee.
    Response,
    /// Notification from the debuggee.
    Event,
}

/// A command sent to the debuggee.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebuggeeCommand {
    /// Sequence number, echoed back as `request_seq`.
    pub seq: u64,
    /// Always [`MessageType::Request`].
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Debugger command name, e.g. `evaluate`.
    pub command: String,
    /// Command arguments; absent when the command takes none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl DebuggeeCommand {
    /// Build a request command.
    pub fn new(seq: u64, command: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            seq,
            kind: MessageType::Request,
            command: command.into(),
            arguments,
        }
    }

    /// Serialize to the JSON body that goes inside a frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A reply from the debuggee.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DebuggeeResponse {
    /// Sequence number of the command this answers.
    pub request_seq: u64,
    /// Command this answers.
    #[serde(default)]
    pub command: String,
    /// Result body.
    #[serde(default)]
    pub body: Option<Value>,
    /// Whether the command succeeded; absent means success.
    #[serde(default)]
    pub success: Option<bool>,
    /// Failure description when `success` is false.
    #[serde(default)]
    pub message: Option<String>,
    /// Whether the debuggee is running after this command.
    #[serde(default)]
    pub running: Option<bool>,
}

impl DebuggeeResponse {
    /// False only when the debuggee explicitly reported failure.
    pub fn succeeded(&self) -> bool {
        self.success.unwrap_or(true)
    }
}

/// An unsolicited notification from the debuggee.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DebuggeeEvent {
    /// Event name, e.g. `break`.
    pub event: String,
    /// Event body.
    #[serde(default)]
    pub body: Option<Value>,
}

/// A decoded message from the debuggee.
#[derive(Clone, Debug, PartialEq)]
pub enum DebuggeeMessage {
    /// `type: "response"`.
    Response(DebuggeeResponse),
    /// `type: "event"`.
    Event(DebuggeeEvent),
}

impl DebuggeeMessage {
    /// Parse a frame body.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Classify an already-parsed body by its `type` field.
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
        match kind.as_deref() {
            Some("response") => Ok(Self::Response(serde_json::from_value(value)?)),
            Some("event") => Ok(Self::Event(serde_json::from_value(value)?)),
            Some(other) => Err(BridgeError::Protocol(format!(
                "invalid message type: {other}"
            ))),
            None => Err(BridgeError::Protocol("message has no type".into())),
        }
    }
}
