//! WebSocket session lifecycle: one front-end from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};
use v8bridge_core::SessionId;
use v8bridge_settings::{ServerSettings, SessionPolicy};

use super::bridge::Bridge;
use super::heartbeat::Liveness;
use crate::debuggee::DebuggeeHandle;
use crate::registry::{SessionLease, SessionRegistry};

/// How long the writer gets to flush and send a Close frame on teardown.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a session needs besides its socket.
pub struct SessionContext {
    /// This session's id.
    pub session_id: SessionId,
    /// Debuggee connection this session drives.
    pub debuggee: DebuggeeHandle,
    /// Cancellation and completion signals from admission.
    pub lease: SessionLease,
    /// Registry the session removes itself from on exit.
    pub registry: Arc<SessionRegistry>,
}

/// Run a front-end session until the client leaves, goes silent, is
/// displaced, or the server shuts down.
///
/// Attaches to the debuggee, starts it, then relays in both directions. On
/// exit a per-session debuggee is closed and a shared one is only detached.
#[instrument(skip_all, fields(session_id = %ctx.session_id))]
pub async fn run_session(socket: WebSocket, ctx: SessionContext, settings: &ServerSettings) {
    let SessionContext {
        session_id,
        debuggee,
        lease,
        registry,
    } = ctx;
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (send_tx, mut send_rx) = mpsc::channel::<String>(settings.send_queue);
    let liveness = Arc::new(Liveness::new());

    info!(policy = ?settings.policy, "front-end connected");

    let mut events = debuggee.attach();
    debuggee.start();
    let mut bridge = Bridge::new(session_id.clone(), debuggee.clone(), send_tx);

    // Writer: drain outbound messages and send periodic pings. A closed
    // channel means the session is over, so say goodbye with a Close frame.
    let heartbeat_interval = settings.heartbeat_interval();
    let client_timeout = settings.client_timeout();
    let writer_liveness = Arc::clone(&liveness);
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat_interval);
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = ping.tick() => {
                    if writer_liveness.is_expired(client_timeout) {
                        warn!(idle = ?writer_liveness.idle(), "front-end unresponsive, disconnecting");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    trace!("sent ping");
                }
            }
        }
    });

    let mut writer_done = false;
    let reason = loop {
        tokio::select! {
            () = lease.cancel.cancelled() => break "displaced",
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    liveness.touch();
                    bridge.on_frontend_text(text.as_str()).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    liveness.touch();
                    if let Ok(text) = std::str::from_utf8(&data) {
                        bridge.on_frontend_text(text).await;
                    } else {
                        debug!(len = data.len(), "ignoring non-UTF-8 binary frame");
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => liveness.touch(),
                Some(Ok(Message::Close(_))) | None => break "client closed",
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read failed");
                    break "socket error";
                }
            },
            event = events.recv() => match event {
                Some(event) => bridge.on_debuggee_event(event),
                None => break "debuggee detached",
            },
            _ = &mut writer => {
                writer_done = true;
                break "writer stopped";
            }
        }
    };

    let _ = registry.remove(&session_id);
    match settings.policy {
        SessionPolicy::PerSession => debuggee.close().await,
        SessionPolicy::Exclusive => debuggee.detach(),
    }

    drop(bridge);
    if !writer_done && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(reason, "front-end disconnected");
    drop(lease);
}
