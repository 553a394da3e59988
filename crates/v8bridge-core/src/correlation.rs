//! Tracks commands awaiting a debuggee response.
//!
//! Responses are matched by `request_seq`, never by arrival order. The tracker
//! only observes: it reports anomalies but never filters or rewrites messages.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::messages::{DebuggeeCommand, DebuggeeResponse};

/// Result of recording an outbound command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendCheck {
    /// Fresh, strictly increasing seq.
    Fresh,
    /// The seq is still awaiting a response.
    Duplicate,
    /// The seq is not greater than the previous one.
    NotIncreasing,
}

/// Result of recording an inbound response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseMatch {
    /// Matched an in-flight command.
    Matched {
        /// Command name recorded at send time.
        command: String,
        /// Time between send and response.
        latency: Duration,
    },
    /// No command with this seq is in flight.
    Unknown,
}

#[derive(Debug)]
struct InFlight {
    command: String,
    sent_at: Instant,
}

/// In-flight command tracker for one session.
#[derive(Debug, Default)]
pub struct Correlator {
    in_flight: HashMap<u64, InFlight>,
    last_seq: Option<u64>,
}

impl Correlator {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a command handed to the debuggee connection.
    pub fn record_sent(&mut self, cmd: &DebuggeeCommand) -> SendCheck {
        let check = if self.in_flight.contains_key(&cmd.seq) {
            warn!(seq = cmd.seq, command = %cmd.command, "seq already in flight");
            SendCheck::Duplicate
        } else if self.last_seq.is_some_and(|last| cmd.seq <= last) {
            warn!(
                seq = cmd.seq,
                last_seq = ?self.last_seq,
                command = %cmd.command,
                "seq not increasing, responses may be ambiguous"
            );
            SendCheck::NotIncreasing
        } else {
            SendCheck::Fresh
        };

        self.last_seq = Some(self.last_seq.map_or(cmd.seq, |last| last.max(cmd.seq)));
        let _ = self.in_flight.insert(
            cmd.seq,
            InFlight {
                command: cmd.command.clone(),
                sent_at: Instant::now(),
            },
        );
        check
    }

    /// Record a response from the debuggee.
    pub fn record_response(&mut self, resp: &DebuggeeResponse) -> ResponseMatch {
        match self.in_flight.remove(&resp.request_seq) {
            Some(entry) => {
                let latency = entry.sent_at.elapsed();
                debug!(
                    seq = resp.request_seq,
                    command = %entry.command,
                    latency_ms = latency.as_millis(),
                    "response matched"
                );
                ResponseMatch::Matched {
                    command: entry.command,
                    latency,
                }
            }
            None => {
                warn!(
                    seq = resp.request_seq,
                    command = %resp.command,
                    "response for unknown seq"
                );
                ResponseMatch::Unknown
            }
        }
    }

    /// Forget everything in flight. Used when the debuggee connection drops,
    /// since responses to already-written commands will never arrive.
    pub fn clear(&mut self) {
        if !self.in_flight.is_empty() {
            debug!(abandoned = self.in_flight.len(), "clearing in-flight commands");
        }
        self.in_flight.clear();
    }

    /// Number of commands awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
