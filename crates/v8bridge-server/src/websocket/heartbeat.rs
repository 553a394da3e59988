//! Front-end liveness tracking for ping/pong heartbeats.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Last time anything was heard from a front-end.
///
/// Shared between the reader (which records traffic) and the writer (which
/// sends pings and gives up once the client has been silent too long).
#[derive(Debug)]
pub struct Liveness {
    epoch: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    /// A tracker that has just heard from its client.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    /// Record traffic from the client.
    pub fn touch(&self) {
        self.last_seen_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Time since the client was last heard from.
    pub fn idle(&self) -> Duration {
        let last = self.last_seen_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    /// Whether the client has been silent for longer than `timeout`.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.idle() > timeout
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
