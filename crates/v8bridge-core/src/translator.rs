//! Pure mapping between the front-end and debuggee vocabularies.
//!
//! Requests go one way through [`translate_request`]; debuggee responses and
//! events come back through [`translate_debuggee_message`]. Nothing here does
//! I/O or keeps state.

use std::path::PathBuf;

use serde_json::{json, Value};

use crate::errors::{BridgeError, Result};
use crate::messages::{
    DebuggeeCommand, DebuggeeEvent, DebuggeeMessage, DebuggeeResponse, FrontendMessage,
    FrontendRequest,
};

/// Source prefix matching the wrapper the runtime applies to every module.
pub const MODULE_WRAPPER_PREFIX: &str =
    "(function (exports, require, module, __filename, __dirname) { ";
/// Source suffix closing [`MODULE_WRAPPER_PREFIX`].
pub const MODULE_WRAPPER_SUFFIX: &str = " });";

/// Methods in this namespace are forwarded as raw debugger commands.
pub const PASSTHROUGH_NAMESPACE: &str = "V8.";

/// Front-end methods handled by the bridge itself.
pub mod local_methods {
    /// Kill and respawn a managed debuggee.
    pub const RESTART: &str = "Bridge.restart";
    /// Change the script launched by the next spawn.
    pub const SET_SCRIPT_PATH: &str = "Bridge.setScriptPath";
}

/// Front-end events emitted by the bridge itself.
pub mod bridge_events {
    /// The debuggee connection came up.
    pub const CONNECTED: &str = "Bridge.connected";
    /// The debuggee connection went down.
    pub const DISCONNECTED: &str = "Bridge.disconnected";
    /// A connection-level error occurred.
    pub const ERROR: &str = "Bridge.error";
}

/// An operation the bridge performs without talking to the debuggee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalCommand {
    /// Restart the managed debuggee process.
    Restart,
    /// Use this script for subsequent spawns.
    SetScriptPath(PathBuf),
}

/// Outcome of translating a front-end request.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestTranslation {
    /// Send this command to the debuggee.
    Forward(DebuggeeCommand),
    /// Handle locally; nothing is sent to the debuggee.
    Local(LocalCommand),
}

/// Wrap live-edited source the same way the runtime wraps modules on load.
pub fn wrap_module_source(source: &str) -> String {
    let mut wrapped =
        String::with_capacity(MODULE_WRAPPER_PREFIX.len() + source.len() + MODULE_WRAPPER_SUFFIX.len());
    wrapped.push_str(MODULE_WRAPPER_PREFIX);
    wrapped.push_str(source);
    wrapped.push_str(MODULE_WRAPPER_SUFFIX);
    wrapped
}

/// Translate a front-end request into a debuggee command or a local operation.
///
/// The command's `seq` is the request id so the response can be routed back.
/// Unknown methods fail with [`BridgeError::UnmappedCommand`]; callers log and
/// drop them.
pub fn translate_request(req: &FrontendRequest) -> Result<RequestTranslation> {
    if let Some(command) = req.method.strip_prefix(PASSTHROUGH_NAMESPACE) {
        if command.is_empty() {
            return Err(BridgeError::UnmappedCommand(req.method.clone()));
        }
        return Ok(RequestTranslation::Forward(DebuggeeCommand::new(
            req.id,
            command,
            req.params.clone(),
        )));
    }

    let (command, arguments) = match req.method.as_str() {
        "Debugger.resume" => ("continue", None),
        "Debugger.stepOver" => ("continue", Some(json!({ "stepaction": "next" }))),
        "Debugger.stepInto" => ("continue", Some(json!({ "stepaction": "in" }))),
        "Debugger.stepOut" => ("continue", Some(json!({ "stepaction": "out" }))),
        "Debugger.pause" => ("suspend", None),
        "Runtime.evaluate" => (
            "evaluate",
            Some(json!({
                "expression": req.param("expression"),
                "disable_break": false,
            })),
        ),
        "Debugger.setScriptSource" => {
            let source = req
                .param("scriptSource")
                .and_then(Value::as_str)
                .map(wrap_module_source);
            (
                "changelive",
                Some(json!({
                    "script_id": req.param("scriptId"),
                    "new_source": source,
                })),
            )
        }
        "Debugger.setBreakpoint" => (
            "setbreakpoint",
            Some(json!({
                "type": "scriptId",
                "target": req.param("scriptId"),
                "line": req.param("line").or_else(|| req.param("lineNumber")),
                "column": req.param("column").or_else(|| req.param("columnNumber")),
            })),
        ),
        local_methods::RESTART => return Ok(RequestTranslation::Local(LocalCommand::Restart)),
        local_methods::SET_SCRIPT_PATH => {
            let path = req
                .param("path")
                .and_then(Value::as_str)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    BridgeError::invalid_params(&req.method, "expected a non-empty string `path`")
                })?;
            return Ok(RequestTranslation::Local(LocalCommand::SetScriptPath(
                PathBuf::from(path),
            )));
        }
        other => return Err(BridgeError::UnmappedCommand(other.to_owned())),
    };

    Ok(RequestTranslation::Forward(DebuggeeCommand::new(
        req.id,
        command,
        arguments.and_then(prune_arguments),
    )))
}

/// Drop null entries from an argument map; an empty map means no arguments.
fn prune_arguments(arguments: Value) -> Option<Value> {
    match arguments {
        Value::Object(mut map) => {
            map.retain(|_, v| !v.is_null());
            (!map.is_empty()).then_some(Value::Object(map))
        }
        Value::Null => None,
        other => Some(other),
    }
}

/// Translate a debuggee response.
///
/// `evaluate` results are nested under `result`; every other command passes
/// its body through unchanged. Explicit failures become error replies.
pub fn translate_response(resp: &DebuggeeResponse) -> FrontendMessage {
    if !resp.succeeded() {
        let message = resp
            .message
            .clone()
            .unwrap_or_else(|| format!("{} failed", resp.command));
        return FrontendMessage::error(resp.request_seq, Some("command_failed"), message);
    }

    let result = match resp.command.as_str() {
        "evaluate" => Some(json!({ "result": resp.body })),
        _ => resp.body.clone(),
    };
    FrontendMessage::response(resp.request_seq, result)
}

/// Translate a debuggee event. Unrecognized events fail with
/// [`BridgeError::UnmappedEvent`].
pub fn translate_event(event: &DebuggeeEvent) -> Result<FrontendMessage> {
    let reason = match event.event.as_str() {
        "break" => "other",
        "exception" => "exception",
        other => return Err(BridgeError::UnmappedEvent(other.to_owned())),
    };
    Ok(FrontendMessage::event(
        "Debugger.paused",
        Some(json!({ "reason": reason, "data": event.body })),
    ))
}

/// Translate any decoded debuggee message.
pub fn translate_debuggee_message(msg: &DebuggeeMessage) -> Result<FrontendMessage> {
    match msg {
        DebuggeeMessage::Response(resp) => Ok(translate_response(resp)),
        DebuggeeMessage::Event(event) => translate_event(event),
    }
}
