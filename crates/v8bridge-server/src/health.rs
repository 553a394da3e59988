//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;
use v8bridge_settings::SessionPolicy;

use crate::debuggee::DebuggeeStatus;
use crate::registry::SessionSummary;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Session sharing policy in effect.
    pub policy: SessionPolicy,
    /// Number of connected front-ends.
    pub sessions: usize,
    /// The shared debuggee connection, under the exclusive policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debuggee: Option<DebuggeeStatus>,
    /// One entry per connected front-end.
    pub session_details: Vec<SessionSummary>,
}

/// Build a health response from live state.
pub fn health_check(
    start_time: Instant,
    policy: SessionPolicy,
    shared: Option<DebuggeeStatus>,
    sessions: Vec<SessionSummary>,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        policy,
        sessions: sessions.len(),
        debuggee: shared,
        session_details: sessions,
    }
}
