use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::ExitStatus;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};
use v8bridge_core::{BridgeError, Frame, V8Codec};
use v8bridge_settings::{DebuggeeSettings, ProcessSettings};

use super::process;
use super::{ConnectionState, DebuggeeEvent, DebuggeeStatus, ScriptTarget};

#[derive(Debug)]
pub(super) enum Op {
    Start,
    Connect,
    SpawnAndSupervise {
        script: Option<PathBuf>,
    },
    Restart {
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Send(String),
    Close {
        reply: oneshot::Sender<()>,
    },
    Attach {
        sink: mpsc::UnboundedSender<DebuggeeEvent>,
    },
    Detach,
}

/// Results of work the actor hands off to other tasks.
enum Internal {
    ConnectResult {
        attempt: u64,
        result: Result<TcpStream, BridgeError>,
    },
    Frame {
        generation: u64,
        frame: Frame,
    },
    ReadClosed {
        generation: u64,
        error: Option<std::io::Error>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerKind {
    /// Runtime was just spawned; connect once it has had time to listen.
    Settle,
    /// Reconnect after a failed or dropped connection.
    Retry,
}

enum Step {
    Op(Option<Op>),
    Internal(Internal),
    ChildExited(std::io::Result<ExitStatus>),
    Timer,
}

pub(super) struct DebuggeeActor {
    settings: DebuggeeSettings,
    process: ProcessSettings,
    script: ScriptTarget,
    owns_process: bool,

    state: ConnectionState,
    pending: VecDeque<String>,
    writer: Option<FramedWrite<OwnedWriteHalf, V8Codec>>,
    reader: Option<JoinHandle<()>>,
    connecting: Option<JoinHandle<()>>,
    // Bumped whenever a socket is dropped so late reads are ignored.
    generation: u64,
    // Bumped per connect attempt so cancelled attempts are ignored.
    attempt: u64,
    child: Option<Child>,
    timer: Option<(Instant, TimerKind)>,

    sink: Option<mpsc::UnboundedSender<DebuggeeEvent>>,
    status: watch::Sender<DebuggeeStatus>,
    inbox_tx: mpsc::UnboundedSender<Internal>,
    inbox: mpsc::UnboundedReceiver<Internal>,
}

impl DebuggeeActor {
    pub(super) fn new(
        settings: DebuggeeSettings,
        process: ProcessSettings,
        script: ScriptTarget,
    ) -> (Self, watch::Receiver<DebuggeeStatus>) {
        let owns_process = process.managed;
        let (status, status_rx) = watch::channel(DebuggeeStatus {
            state: ConnectionState::Disconnected,
            child_pid: None,
            queued: 0,
            owns_process,
        });
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let actor = Self {
            settings,
            process,
            script,
            owns_process,
            state: ConnectionState::Disconnected,
            pending: VecDeque::new(),
            writer: None,
            reader: None,
            connecting: None,
            generation: 0,
            attempt: 0,
            child: None,
            timer: None,
            sink: None,
            status,
            inbox_tx,
            inbox,
        };
        (actor, status_rx)
    }

    pub(super) async fn run(mut self, mut ops: mpsc::UnboundedReceiver<Op>) {
        loop {
            let deadline = self.timer.map(|(at, _)| at);
            let step = tokio::select! {
                op = ops.recv() => Step::Op(op),
                Some(msg) = self.inbox.recv() => Step::Internal(msg),
                status = process::wait_child(&mut self.child) => Step::ChildExited(status),
                () = sleep_until(deadline) => Step::Timer,
            };

            match step {
                Step::Op(Some(op)) => self.handle_op(op).await,
                Step::Op(None) => break,
                Step::Internal(msg) => self.handle_internal(msg).await,
                Step::ChildExited(status) => self.on_child_exit(status),
                Step::Timer => self.on_timer(),
            }
        }

        self.close().await;
        debug!("debuggee connection task stopped");
    }

    async fn handle_op(&mut self, op: Op) {
        match op {
            Op::Start => self.start(),
            Op::Connect => self.connect(),
            Op::SpawnAndSupervise { script } => self.spawn_or_report(script),
            Op::Restart { reply } => {
                let result = self.restart().await;
                let _ = reply.send(result);
            }
            Op::Send(body) => self.send(body).await,
            Op::Close { reply } => {
                self.close().await;
                let _ = reply.send(());
            }
            Op::Attach { sink } => self.attach(sink),
            Op::Detach => self.detach(),
        }
    }

    async fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::ConnectResult { attempt, result } => {
                if attempt != self.attempt || self.state != ConnectionState::Connecting {
                    debug!(attempt, current = self.attempt, "ignoring stale connect result");
                    return;
                }
                self.connecting = None;
                match result {
                    Ok(stream) => self.install(stream).await,
                    Err(e) => self.fail(e),
                }
            }
            Internal::Frame { generation, frame } => {
                if generation != self.generation {
                    return;
                }
                match frame {
                    Frame::Handshake { headers } => info!(?headers, "debugger handshake"),
                    Frame::Message(body) => match serde_json::from_str::<Value>(&body) {
                        Ok(value) => self.emit(DebuggeeEvent::Message(value)),
                        Err(e) => self.fail(BridgeError::Json(e)),
                    },
                }
            }
            Internal::ReadClosed { generation, error } => {
                if generation != self.generation {
                    return;
                }
                info!("debugger closed the connection");
                self.connection_lost(error);
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    fn start(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!(state = ?self.state, "debuggee already starting or connected");
            return;
        }
        if self.owns_process && self.child.is_none() {
            self.spawn_or_report(None);
        } else {
            self.begin_connect();
        }
    }

    fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!(state = ?self.state, "connect ignored");
            return;
        }
        self.begin_connect();
    }

    fn begin_connect(&mut self) {
        self.timer = None;
        self.cancel_connecting();
        self.attempt += 1;

        let attempt = self.attempt;
        let addr = self.settings.addr();
        let timeout = self.settings.connect_timeout();
        let inbox = self.inbox_tx.clone();
        debug!(%addr, attempt, "connecting to debugger");
        self.set_state(ConnectionState::Connecting);

        self.connecting = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err(BridgeError::Connection(format!(
                    "connect to {addr} failed: {e}"
                ))),
                Err(_) => Err(BridgeError::Connection(format!(
                    "connect to {addr} timed out after {}ms",
                    timeout.as_millis()
                ))),
            };
            let _ = inbox.send(Internal::ConnectResult { attempt, result });
        }));
    }

    fn cancel_connecting(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        self.attempt += 1;
    }

    async fn install(&mut self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();

        self.generation += 1;
        let reader = tokio::spawn(read_frames(
            read_half,
            self.generation,
            self.settings.max_frame_bytes,
            self.inbox_tx.clone(),
        ));
        self.reader = Some(reader);
        self.writer = Some(FramedWrite::new(write_half, V8Codec::new()));
        self.set_state(ConnectionState::Connected);

        info!(
            addr = %self.settings.addr(),
            queued = self.pending.len(),
            "connected to debugger"
        );
        self.emit(DebuggeeEvent::Connected);
        self.flush_pending().await;
    }

    fn spawn_or_report(&mut self, script: Option<PathBuf>) {
        if let Err(e) = self.spawn_runtime(script) {
            warn!(error = %e, error_kind = e.error_kind(), "could not start debuggee");
            self.emit(DebuggeeEvent::Error(e));
        }
    }

    fn spawn_runtime(&mut self, script: Option<PathBuf>) -> Result<(), BridgeError> {
        if self.child.is_some() {
            debug!("debuggee process already running");
            return Ok(());
        }
        let script = script.or_else(|| self.script.get()).ok_or_else(|| {
            BridgeError::Connection("no script path configured for the debuggee".into())
        })?;

        let child = process::spawn_runtime(&self.process, self.settings.port, &script)?;
        self.owns_process = true;
        self.child = Some(child);
        self.timer = Some((
            Instant::now() + self.process.settle_delay(),
            TimerKind::Settle,
        ));
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    async fn restart(&mut self) -> Result<(), BridgeError> {
        if !self.owns_process {
            return Err(BridgeError::UnsupportedOperation(
                "restart requires a debuggee process owned by the bridge".into(),
            ));
        }
        info!("restarting debuggee");

        self.timer = None;
        self.cancel_connecting();
        if self.drop_socket() {
            self.emit(DebuggeeEvent::Disconnected);
        }
        if let Some(child) = self.child.take() {
            let _ = process::terminate(child).await;
        }
        self.set_state(ConnectionState::Disconnected);
        self.spawn_runtime(None)
    }

    async fn close(&mut self) {
        let dropped = self.pending.len();
        self.pending.clear();
        self.timer = None;
        self.cancel_connecting();

        let was_connected = self.drop_socket();
        if let Some(child) = self.child.take() {
            let _ = process::terminate(child).await;
        }
        self.set_state(ConnectionState::Disconnected);
        if was_connected {
            info!(dropped, "debuggee connection closed");
            self.emit(DebuggeeEvent::Disconnected);
        }
    }

    /// Drop the socket and its reader. Returns whether it was connected.
    fn drop_socket(&mut self) -> bool {
        self.generation += 1;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer = None;
        let was_connected = self.state == ConnectionState::Connected;
        if was_connected {
            self.set_state(ConnectionState::Disconnected);
        }
        was_connected
    }

    fn connection_lost(&mut self, error: Option<std::io::Error>) {
        if let Some(e) = error {
            self.fail(BridgeError::Io(e));
            return;
        }
        if self.drop_socket() {
            self.emit(DebuggeeEvent::Disconnected);
        }
        self.schedule_retry();
    }

    /// Transport-level errors are logged and the connection stays up.
    /// Connection-level errors drop the socket, reach the session, and may
    /// schedule a retry.
    fn fail(&mut self, err: BridgeError) {
        if !err.tears_down_connection() {
            warn!(
                error = %err,
                error_kind = err.error_kind(),
                transport = err.is_transport_level(),
                "debugger error, connection kept"
            );
            return;
        }
        warn!(error = %err, error_kind = err.error_kind(), "debugger connection error");
        let was_connected = self.drop_socket();
        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
        }
        self.emit(DebuggeeEvent::Error(err));
        if was_connected {
            self.emit(DebuggeeEvent::Disconnected);
        }
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        if !self.settings.reconnect_enabled {
            return;
        }
        if self.sink.is_none() {
            debug!("no session attached, not scheduling reconnect");
            return;
        }
        let interval = self.settings.reconnect_interval();
        self.timer = Some((Instant::now() + interval, TimerKind::Retry));
        debug!(interval_ms = interval.as_millis(), "reconnect scheduled");
    }

    fn on_timer(&mut self) {
        let Some((_, kind)) = self.timer.take() else {
            return;
        };
        match kind {
            TimerKind::Settle => self.begin_connect(),
            TimerKind::Retry if self.state == ConnectionState::Disconnected => {
                debug!("retrying debugger connection");
                self.begin_connect();
            }
            TimerKind::Retry => {}
        }
    }

    fn on_child_exit(&mut self, status: std::io::Result<ExitStatus>) {
        self.child = None;
        match status {
            Ok(status) => info!(%status, "debuggee process exited"),
            Err(e) => warn!(error = %e, "failed waiting for debuggee process"),
        }
        if matches!(self.timer, Some((_, TimerKind::Settle))) {
            self.timer = None;
            self.set_state(ConnectionState::Disconnected);
            self.emit(DebuggeeEvent::Error(BridgeError::Connection(
                "debuggee process exited before its debugger was reachable".into(),
            )));
        } else {
            self.publish();
        }
    }

    // ── Sending ─────────────────────────────────────────────────────

    async fn send(&mut self, body: String) {
        if self.state == ConnectionState::Connected {
            if let Err(body) = self.write(body).await {
                self.pending.push_front(body);
                self.publish();
            }
        } else {
            self.pending.push_back(body);
            debug!(
                queued = self.pending.len(),
                state = ?self.state,
                "debugger not connected, queueing message"
            );
            self.publish();
        }
    }

    async fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        debug!(count = self.pending.len(), "flushing queued messages");
        while let Some(body) = self.pending.pop_front() {
            if let Err(body) = self.write(body).await {
                self.pending.push_front(body);
                break;
            }
        }
        self.publish();
    }

    /// Write one framed message. Hands the body back if it was not written.
    async fn write(&mut self, body: String) -> Result<(), String> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(body);
        };
        match writer.send(body.as_str()).await {
            Ok(()) => {
                trace!(len = body.len(), "wrote message to debugger");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "write to debugger failed, requeueing");
                self.connection_lost(Some(e));
                Err(body)
            }
        }
    }

    // ── Session wiring ──────────────────────────────────────────────

    fn attach(&mut self, sink: mpsc::UnboundedSender<DebuggeeEvent>) {
        if self.sink.is_some() {
            debug!("replacing attached session");
        }
        if self.state == ConnectionState::Connected {
            let _ = sink.send(DebuggeeEvent::Connected);
        }
        self.sink = Some(sink);
    }

    fn detach(&mut self) {
        self.sink = None;
        // Queued sends belong to the departing session; a later session
        // numbers its requests afresh.
        if !self.pending.is_empty() {
            info!(dropped = self.pending.len(), "session detached, discarding queued messages");
            self.pending.clear();
            self.publish();
        }
        if matches!(self.timer, Some((_, TimerKind::Retry))) {
            debug!("session detached, cancelling reconnect");
            self.timer = None;
        }
    }

    fn emit(&mut self, event: DebuggeeEvent) {
        let delivered = match &self.sink {
            Some(sink) => sink.send(event).is_ok(),
            None => return,
        };
        if !delivered {
            debug!("attached session is gone");
            self.detach();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let _ = self.status.send_replace(DebuggeeStatus {
            state: self.state,
            child_pid: self.child.as_ref().and_then(Child::id),
            queued: self.pending.len(),
            owns_process: self.owns_process,
        });
    }
}

async fn read_frames(
    read_half: OwnedReadHalf,
    generation: u64,
    max_frame_bytes: usize,
    inbox: mpsc::UnboundedSender<Internal>,
) {
    let mut frames = FramedRead::new(read_half, V8Codec::with_max_frame_len(max_frame_bytes));
    let error = loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                if inbox.send(Internal::Frame { generation, frame }).is_err() {
                    return;
                }
            }
            Some(Err(e)) => break Some(e),
            None => break None,
        }
    };
    let _ = inbox.send(Internal::ReadClosed { generation, error });
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
