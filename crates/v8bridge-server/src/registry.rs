//! Live front-end sessions and admission under the session policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use v8bridge_core::SessionId;

use crate::debuggee::{DebuggeeHandle, DebuggeeStatus};

/// Signals handed to an admitted session.
///
/// `cancel` asks the session to stop. Dropping the lease marks it finished,
/// which is what displacement waits on.
#[derive(Debug)]
pub struct SessionLease {
    /// Cancelled when the session is displaced or the server shuts down.
    pub cancel: CancellationToken,
    finished: CancellationToken,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.finished.cancel();
    }
}

struct SessionEntry {
    connected_at: DateTime<Utc>,
    cancel: CancellationToken,
    finished: CancellationToken,
    debuggee: DebuggeeHandle,
}

/// Per-session health information.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session id.
    pub session_id: String,
    /// RFC 3339 connect time.
    pub connected_at: String,
    /// Status of the session's debuggee connection.
    pub debuggee: DebuggeeStatus,
}

/// Registry of connected front-ends.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
    admission: Mutex<()>,
    displace_timeout: Duration,
}

impl SessionRegistry {
    /// An empty registry. Displacement waits up to `displace_timeout` for an
    /// old session to finish.
    pub fn new(displace_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            admission: Mutex::new(()),
            displace_timeout,
        }
    }

    /// Register a new session.
    ///
    /// With `exclusive` set every existing session is cancelled first, and
    /// admission waits for each to finish so the shared debuggee is handed
    /// over cleanly. The session's cancel token is a child of `shutdown`.
    pub async fn admit(
        &self,
        id: &SessionId,
        debuggee: DebuggeeHandle,
        shutdown: &CancellationToken,
        exclusive: bool,
    ) -> SessionLease {
        let _guard = self.admission.lock().await;
        if exclusive {
            self.displace_all().await;
        }

        let cancel = shutdown.child_token();
        let finished = CancellationToken::new();
        let _ = self.sessions.insert(
            id.clone(),
            SessionEntry {
                connected_at: Utc::now(),
                cancel: cancel.clone(),
                finished: finished.clone(),
                debuggee,
            },
        );
        info!(session_id = %id, sessions = self.sessions.len(), "session admitted");
        SessionLease { cancel, finished }
    }

    async fn displace_all(&self) {
        let displaced: Vec<(SessionId, CancellationToken)> = self
            .sessions
            .iter()
            .map(|entry| {
                entry.cancel.cancel();
                (entry.key().clone(), entry.finished.clone())
            })
            .collect();

        for (id, finished) in displaced {
            info!(session_id = %id, "displacing session");
            let wait = tokio::time::timeout(self.displace_timeout, finished.cancelled()).await;
            if wait.is_err() {
                warn!(session_id = %id, "displaced session did not finish in time");
                let _ = self.sessions.remove(&id);
            }
        }
    }

    /// Remove a session. Returns whether it was present.
    pub fn remove(&self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Debuggee handles of every live session.
    pub fn debuggees(&self) -> Vec<DebuggeeHandle> {
        self.sessions.iter().map(|e| e.debuggee.clone()).collect()
    }

    /// Health view of every live session, oldest first.
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut entries: Vec<(DateTime<Utc>, SessionSummary)> = self
            .sessions
            .iter()
            .map(|e| {
                let summary = SessionSummary {
                    session_id: e.key().to_string(),
                    connected_at: e.connected_at.to_rfc3339(),
                    debuggee: e.debuggee.status(),
                };
                (e.connected_at, summary)
            })
            .collect();
        entries.sort_by_key(|(at, _)| *at);
        entries.into_iter().map(|(_, s)| s).collect()
    }
}
