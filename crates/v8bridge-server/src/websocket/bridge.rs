//! Per-session message relay between one front-end and its debuggee.

use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use v8bridge_core::correlation::Correlator;
use v8bridge_core::summarize::summarize_params;
use v8bridge_core::translator::{self, bridge_events};
use v8bridge_core::{
    BridgeError, DebuggeeMessage, FrontendMessage, FrontendRequest, LocalCommand,
    RequestTranslation, SessionId,
};

use crate::debuggee::{DebuggeeEvent, DebuggeeHandle};

/// Translates front-end requests into debuggee commands and debuggee
/// output back into front-end messages.
pub struct Bridge {
    session_id: SessionId,
    debuggee: DebuggeeHandle,
    correlator: Correlator,
    outbound: mpsc::Sender<String>,
}

impl Bridge {
    /// Relay for one session. `outbound` feeds the WebSocket writer.
    pub fn new(
        session_id: SessionId,
        debuggee: DebuggeeHandle,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        Self {
            session_id,
            debuggee,
            correlator: Correlator::new(),
            outbound,
        }
    }

    /// Commands sent and not yet answered.
    pub fn in_flight(&self) -> usize {
        self.correlator.in_flight()
    }

    /// Handle one text frame from the front-end.
    pub async fn on_frontend_text(&mut self, text: &str) {
        let req = match FrontendRequest::parse(text) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, error_kind = e.error_kind(), len = text.len(), "dropping unparseable front-end message");
                return;
            }
        };
        debug!(
            id = req.id,
            method = %req.method,
            params = %summarize_params(req.params.as_ref()),
            "front-end request"
        );

        match translator::translate_request(&req) {
            Ok(RequestTranslation::Forward(cmd)) => {
                let _ = self.correlator.record_sent(&cmd);
                match cmd.to_json() {
                    Ok(body) => self.debuggee.send(body),
                    Err(e) => {
                        warn!(id = req.id, error = %e, "failed to encode debuggee command");
                        self.reply(&FrontendMessage::from_error(req.id, &e));
                    }
                }
            }
            Ok(RequestTranslation::Local(cmd)) => self.run_local(req.id, cmd).await,
            Err(BridgeError::UnmappedCommand(method)) => {
                debug!(id = req.id, %method, "no debuggee mapping, request dropped");
            }
            Err(e) => {
                warn!(id = req.id, method = %req.method, error = %e, "rejecting front-end request");
                self.reply(&FrontendMessage::from_error(req.id, &e));
            }
        }
    }

    async fn run_local(&mut self, id: u64, cmd: LocalCommand) {
        let reply = match cmd {
            LocalCommand::Restart => match self.debuggee.restart().await {
                Ok(()) => FrontendMessage::response(id, Some(json!({}))),
                Err(e) => {
                    warn!(id, error = %e, "restart failed");
                    FrontendMessage::from_error(id, &e)
                }
            },
            LocalCommand::SetScriptPath(path) => {
                self.debuggee.set_script_path(path);
                FrontendMessage::response(id, Some(json!({})))
            }
        };
        self.reply(&reply);
    }

    /// Handle one notification from the debuggee connection.
    pub fn on_debuggee_event(&mut self, event: DebuggeeEvent) {
        match event {
            DebuggeeEvent::Connected => {
                self.reply(&FrontendMessage::event(bridge_events::CONNECTED, None));
            }
            DebuggeeEvent::Disconnected => {
                let abandoned = self.correlator.in_flight();
                if abandoned > 0 {
                    debug!(abandoned, "debuggee went away with commands in flight");
                }
                self.correlator.clear();
                self.reply(&FrontendMessage::event(bridge_events::DISCONNECTED, None));
            }
            DebuggeeEvent::Error(e) => {
                let params = json!({ "kind": e.error_kind(), "message": e.to_string() });
                self.reply(&FrontendMessage::event(bridge_events::ERROR, Some(params)));
            }
            DebuggeeEvent::Message(value) => self.on_debuggee_message(value),
        }
    }

    fn on_debuggee_message(&mut self, value: serde_json::Value) {
        let msg = match DebuggeeMessage::from_value(value) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, error_kind = e.error_kind(), "dropping debuggee message");
                return;
            }
        };
        if let DebuggeeMessage::Response(resp) = &msg {
            let _ = self.correlator.record_response(resp);
        }

        match translator::translate_debuggee_message(&msg) {
            Ok(out) => self.reply(&out),
            Err(BridgeError::UnmappedEvent(event)) => {
                debug!(%event, "no front-end mapping, event dropped");
            }
            Err(e) => warn!(error = %e, "failed to translate debuggee message"),
        }
    }

    fn reply(&self, msg: &FrontendMessage) {
        let text = msg.to_json();
        if text.is_empty() {
            return;
        }
        match self.outbound.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Full(text)) => warn!(
                session_id = %self.session_id,
                len = text.len(),
                "front-end send queue full, dropping message"
            ),
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = %self.session_id, "front-end writer closed");
            }
        }
    }
}
