//! The back-end side of a session: one connection to a V8 debugger.
//!
//! A [`DebuggeeHandle`] is a cheap, cloneable front for a single actor task
//! that owns the socket, the pending-send queue and (in managed mode) the
//! runtime process. Every operation is a message to that task, so writes are
//! serialized and FIFO order holds across reconnects.

mod actor;
pub mod process;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use v8bridge_core::BridgeError;
use v8bridge_settings::{DebuggeeSettings, ProcessSettings};

use actor::{DebuggeeActor, Op};

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket. Sends are queued.
    Disconnected,
    /// A connect attempt or process start is in progress.
    Connecting,
    /// Socket is live. Sends go straight out.
    Connected,
}

/// Snapshot published by the actor on every state change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuggeeStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Pid of the managed runtime, if running.
    pub child_pid: Option<u32>,
    /// Messages waiting for a connection.
    pub queued: usize,
    /// Whether this connection spawns its own runtime.
    pub owns_process: bool,
}

/// Notifications delivered to the attached session.
#[derive(Debug)]
pub enum DebuggeeEvent {
    /// The socket connected and the queue was flushed.
    Connected,
    /// An established socket went away.
    Disconnected,
    /// A connection-level failure.
    Error(BridgeError),
    /// One decoded message body.
    Message(Value),
}

/// Script launched by the next spawn. Shared between the actor and handles so
/// updates apply without a round trip.
#[derive(Clone, Debug, Default)]
pub struct ScriptTarget(Arc<RwLock<Option<PathBuf>>>);

impl ScriptTarget {
    /// A target initialised to `path`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self(Arc::new(RwLock::new(path)))
    }

    /// Current script path.
    pub fn get(&self) -> Option<PathBuf> {
        self.0.read().clone()
    }

    /// Replace the script path.
    pub fn set(&self, path: PathBuf) {
        *self.0.write() = Some(path);
    }
}

/// Handle to a debuggee connection actor.
///
/// The actor stops, killing any managed runtime, once every handle is dropped.
#[derive(Clone, Debug)]
pub struct DebuggeeHandle {
    ops: mpsc::UnboundedSender<Op>,
    status: watch::Receiver<DebuggeeStatus>,
    script: ScriptTarget,
}

impl DebuggeeHandle {
    /// Start the actor task for one debuggee connection.
    pub fn spawn(debuggee: DebuggeeSettings, process: ProcessSettings) -> Self {
        let script = ScriptTarget::new(process.script_path.clone());
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (actor, status) = DebuggeeActor::new(debuggee, process, script.clone());
        let _task = tokio::spawn(actor.run(ops_rx));
        Self {
            ops: ops_tx,
            status,
            script,
        }
    }

    /// Bring the connection up the configured way: spawn the runtime when
    /// managed and not running, otherwise connect. No-op when already up.
    pub fn start(&self) {
        self.submit(Op::Start);
    }

    /// Open the TCP connection to the debugger port.
    pub fn connect(&self) {
        self.submit(Op::Connect);
    }

    /// Launch the runtime, wait the settle delay, then connect.
    /// `None` uses the current [`ScriptTarget`].
    pub fn spawn_and_supervise(&self, script: Option<PathBuf>) {
        self.submit(Op::SpawnAndSupervise { script });
    }

    /// Kill and respawn the managed runtime.
    ///
    /// Fails with [`BridgeError::UnsupportedOperation`] when the debuggee is
    /// not owned by this connection.
    pub async fn restart(&self) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Op::Restart { reply });
        rx.await
            .unwrap_or_else(|_| Err(BridgeError::Connection("debuggee connection stopped".into())))
    }

    /// Write a message body, or queue it until connected.
    pub fn send(&self, body: String) {
        self.submit(Op::Send(body));
    }

    /// Tear down the socket and any owned runtime, discarding queued sends.
    /// Idempotent.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        self.submit(Op::Close { reply });
        let _ = rx.await;
    }

    /// Route events to a new receiver, replacing any previous one. A live
    /// connection is announced immediately with [`DebuggeeEvent::Connected`].
    pub fn attach(&self) -> mpsc::UnboundedReceiver<DebuggeeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.submit(Op::Attach { sink: tx });
        rx
    }

    /// Stop routing events, discard queued sends, and cancel any pending
    /// reconnect.
    pub fn detach(&self) {
        self.submit(Op::Detach);
    }

    /// Change the script used by subsequent spawns.
    pub fn set_script_path(&self, path: PathBuf) {
        tracing::info!(path = %path.display(), "debuggee script path updated");
        self.script.set(path);
    }

    /// Script used by the next spawn.
    pub fn script_path(&self) -> Option<PathBuf> {
        self.script.get()
    }

    /// Latest published status.
    pub fn status(&self) -> DebuggeeStatus {
        self.status.borrow().clone()
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> bool {
        let mut rx = self.status.clone();
        let reached = rx.wait_for(|s| s.state == state).await.is_ok();
        reached
    }

    fn submit(&self, op: Op) {
        if self.ops.send(op).is_err() {
            tracing::warn!("debuggee connection task has stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;
    use v8bridge_core::{encode_frame, FrameReader};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn settings(port: u16) -> DebuggeeSettings {
        DebuggeeSettings {
            host: "127.0.0.1".into(),
            port,
            connect_timeout_ms: 1000,
            reconnect_enabled: false,
            reconnect_interval_ms: 50,
            max_frame_bytes: 1024 * 1024,
        }
    }

    fn unmanaged() -> ProcessSettings {
        ProcessSettings::default()
    }

    fn managed_sleeper(script: Option<PathBuf>) -> ProcessSettings {
        ProcessSettings {
            managed: true,
            runtime: "sh".into(),
            runtime_args: vec!["-c".into(), "sleep 30".into()],
            script_path: script,
            settle_delay_ms: 10,
        }
    }

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// A port with nothing listening on it.
    async fn closed_port() -> u16 {
        let (listener, port) = listener().await;
        drop(listener);
        port
    }

    async fn accept(listener: &TcpListener) -> TcpStream {
        timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap().0
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<DebuggeeEvent>) -> DebuggeeEvent {
        timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap()
    }

    async fn read_messages(stream: &mut TcpStream, count: usize) -> Vec<String> {
        let mut reader = FrameReader::new();
        let mut messages = Vec::new();
        let mut buf = [0u8; 1024];
        while messages.len() < count {
            let n = timeout(TIMEOUT, stream.read(&mut buf)).await.unwrap().unwrap();
            assert!(n > 0, "debuggee socket closed early");
            reader.append(&buf[..n]);
            messages.extend(reader.drain_messages());
        }
        messages
    }

    #[test]
    fn script_target_shared_between_clones() {
        let target = ScriptTarget::new(None);
        let other = target.clone();
        other.set(PathBuf::from("/tmp/app.js"));
        assert_eq!(target.get(), Some(PathBuf::from("/tmp/app.js")));
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = DebuggeeStatus {
            state: ConnectionState::Connecting,
            child_pid: Some(42),
            queued: 3,
            owns_process: true,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "connecting");
        assert_eq!(value["childPid"], 42);
        assert_eq!(value["ownsProcess"], true);
    }

    #[tokio::test]
    async fn queued_sends_flush_in_order_after_connect() {
        let (listener, port) = listener().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let mut events = handle.attach();

        handle.send("A".into());
        handle.send("B".into());
        handle.send("C".into());
        handle.connect();

        let mut peer = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));
        assert_eq!(read_messages(&mut peer, 3).await, vec!["A", "B", "C"]);
        assert!(handle.wait_for_state(ConnectionState::Connected).await);
        assert_eq!(handle.status().queued, 0);
    }

    #[tokio::test]
    async fn sends_while_connected_go_straight_out() {
        let (listener, port) = listener().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let mut events = handle.attach();
        handle.connect();
        let mut peer = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));

        handle.send(r#"{"seq":1}"#.into());
        assert_eq!(read_messages(&mut peer, 1).await, vec![r#"{"seq":1}"#]);
    }

    #[tokio::test]
    async fn incoming_frames_become_message_events() {
        let (listener, port) = listener().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let mut events = handle.attach();
        handle.connect();
        let mut peer = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));

        let body = json!({"type": "event", "event": "break", "body": {}}).to_string();
        let mut bytes = b"Type: connect\r\nV8-Version: 3.14\r\nContent-Length: 0\r\n\r\n".to_vec();
        bytes.extend(encode_frame("not json"));
        bytes.extend(encode_frame(&body));
        peer.write_all(&bytes).await.unwrap();

        match next_event(&mut events).await {
            DebuggeeEvent::Message(value) => assert_eq!(value["event"], "break"),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_json_keeps_connection_up() {
        let (listener, port) = listener().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let mut events = handle.attach();
        handle.connect();
        let mut peer = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));

        peer.write_all(&encode_frame("{oops")).await.unwrap();
        peer.write_all(&encode_frame(r#"{"seq":2}"#)).await.unwrap();
        match next_event(&mut events).await {
            DebuggeeEvent::Message(value) => assert_eq!(value["seq"], 2),
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(handle.status().state, ConnectionState::Connected);

        handle.send("still writable".into());
        assert_eq!(read_messages(&mut peer, 1).await, vec!["still writable"]);
    }

    #[tokio::test]
    async fn oversized_frame_is_skipped() {
        let (listener, port) = listener().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let mut events = handle.attach();
        handle.connect();
        let mut peer = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));

        let mut bytes = b"Content-Length: 18446744073709551615\r\n\r\n".to_vec();
        bytes.extend(encode_frame(r#"{"seq":3}"#));
        peer.write_all(&bytes).await.unwrap();

        match next_event(&mut events).await {
            DebuggeeEvent::Message(value) => assert_eq!(value["seq"], 3),
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(handle.status().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn order_holds_across_dropped_connection() {
        let (listener, port) = listener().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let mut events = handle.attach();
        handle.connect();
        let mut first = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));

        handle.send("A".into());
        assert_eq!(read_messages(&mut first, 1).await, vec!["A"]);
        drop(first);
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Disconnected));

        handle.send("B".into());
        handle.send("C".into());
        assert_eq!(handle.status().state, ConnectionState::Disconnected);
        handle.connect();

        let mut second = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));
        assert_eq!(read_messages(&mut second, 2).await, vec!["B", "C"]);
        assert_eq!(handle.status().queued, 0);
    }

    #[tokio::test]
    async fn peer_close_reports_disconnect() {
        let (listener, port) = listener().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let mut events = handle.attach();
        handle.connect();
        let peer = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));

        drop(peer);
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Disconnected));
        assert!(handle.wait_for_state(ConnectionState::Disconnected).await);
    }

    #[tokio::test]
    async fn close_twice_emits_one_disconnect() {
        let (listener, port) = listener().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let mut events = handle.attach();
        handle.connect();
        let _peer = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));

        handle.close().await;
        handle.close().await;

        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Disconnected));
        assert!(events.try_recv().is_err());
        assert_eq!(handle.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn close_discards_queue() {
        let port = closed_port().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        handle.send("dropped".into());
        handle.close().await;
        assert_eq!(handle.status().queued, 0);
    }

    #[tokio::test]
    async fn connect_failure_reports_error_and_keeps_queue() {
        let port = closed_port().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let mut events = handle.attach();
        handle.send("kept".into());
        handle.connect();

        match next_event(&mut events).await {
            DebuggeeEvent::Error(e) => assert!(matches!(e, BridgeError::Connection(_))),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(handle.wait_for_state(ConnectionState::Disconnected).await);
        assert_eq!(handle.status().queued, 1);
    }

    #[tokio::test]
    async fn reconnect_retries_until_debugger_appears() {
        let port = closed_port().await;
        let mut config = settings(port);
        config.reconnect_enabled = true;
        let handle = DebuggeeHandle::spawn(config, unmanaged());
        let mut events = handle.attach();
        handle.send("after reconnect".into());
        handle.connect();

        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Error(_)));

        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let mut peer = accept(&listener).await;
        loop {
            if matches!(next_event(&mut events).await, DebuggeeEvent::Connected) {
                break;
            }
        }
        assert_eq!(read_messages(&mut peer, 1).await, vec!["after reconnect"]);
    }

    #[tokio::test]
    async fn detach_cancels_reconnect() {
        let port = closed_port().await;
        let mut config = settings(port);
        config.reconnect_enabled = true;
        config.reconnect_interval_ms = 200;
        let handle = DebuggeeHandle::spawn(config, unmanaged());
        let mut events = handle.attach();
        handle.connect();
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Error(_)));
        handle.detach();

        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let accepted = timeout(Duration::from_millis(500), listener.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn detach_discards_departing_sessions_queue() {
        let (listener, port) = listener().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let _old = handle.attach();
        handle.send(r#"{"seq":5,"type":"request","command":"continue"}"#.into());
        handle.detach();

        let mut events = handle.attach();
        handle.send(r#"{"seq":1,"type":"request","command":"version"}"#.into());
        handle.connect();

        let mut peer = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));
        assert_eq!(
            read_messages(&mut peer, 1).await,
            vec![r#"{"seq":1,"type":"request","command":"version"}"#]
        );
        assert_eq!(handle.status().queued, 0);

        let mut buf = [0u8; 64];
        let extra = timeout(Duration::from_millis(200), peer.read(&mut buf)).await;
        assert!(extra.is_err(), "unexpected bytes after the new session's request");
    }

    #[tokio::test]
    async fn attach_while_connected_announces_connection() {
        let (listener, port) = listener().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        handle.connect();
        let _peer = accept(&listener).await;
        assert!(handle.wait_for_state(ConnectionState::Connected).await);

        let mut events = handle.attach();
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));
    }

    #[tokio::test]
    async fn restart_unmanaged_is_unsupported() {
        let port = closed_port().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let err = handle.restart().await.unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedOperation(_)));
    }

    #[tokio::test]
    async fn failed_spawn_does_not_take_ownership() {
        let port = closed_port().await;
        let handle = DebuggeeHandle::spawn(settings(port), unmanaged());
        let mut events = handle.attach();
        handle.spawn_and_supervise(None);
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Error(_)));
        assert!(!handle.status().owns_process);

        let err = handle.restart().await.unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedOperation(_)));
    }

    #[tokio::test]
    async fn managed_without_script_reports_error() {
        let port = closed_port().await;
        let handle = DebuggeeHandle::spawn(settings(port), managed_sleeper(None));
        let mut events = handle.attach();
        handle.start();
        match next_event(&mut events).await {
            DebuggeeEvent::Error(e) => assert!(e.to_string().contains("no script path")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(handle.status().child_pid.is_none());
    }

    #[tokio::test]
    async fn managed_spawn_restart_and_close() {
        let (listener, port) = listener().await;
        let script = Some(PathBuf::from("app.js"));
        let handle = DebuggeeHandle::spawn(settings(port), managed_sleeper(script));
        let mut events = handle.attach();

        handle.spawn_and_supervise(None);
        let _first = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));
        let first_pid = handle.status().child_pid;
        assert!(first_pid.is_some());

        handle.restart().await.unwrap();
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Disconnected));
        let _second = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, DebuggeeEvent::Connected));
        let second_pid = handle.status().child_pid;
        assert!(second_pid.is_some());
        assert_ne!(first_pid, second_pid);

        handle.close().await;
        assert!(handle.status().child_pid.is_none());
        assert!(handle.status().owns_process);
    }
}
