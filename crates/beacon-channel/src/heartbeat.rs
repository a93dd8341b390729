//! Heartbeat liveness tracking.
//!
//! Any inbound traffic counts as proof of life, Pong included. The socket
//! driver checks [`Liveness::is_expired`] on every ping tick and tears the
//! connection down once the peer has been silent for longer than the
//! configured window.

use std::time::Duration;

use tokio::time::Instant;

/// Outcome of a liveness check on a ping tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Peer spoke within the window; send another Ping.
    Alive,
    /// Peer has been silent for too long.
    TimedOut,
}

/// Tracks the last time the peer was heard from.
#[derive(Debug)]
pub struct Liveness {
    last_seen: Instant,
    timeout: Duration,
}

impl Liveness {
    /// Start tracking with the peer considered alive now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_seen: Instant::now(),
            timeout,
        }
    }

    /// Record inbound traffic.
    pub fn mark_alive(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Time since the peer was last heard from.
    pub fn silence(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// Whether the silence window has been exceeded.
    pub fn is_expired(&self) -> bool {
        self.silence() > self.timeout
    }

    /// Liveness verdict for a ping tick.
    pub fn check(&self) -> HeartbeatResult {
        if self.is_expired() {
            HeartbeatResult::TimedOut
        } else {
            HeartbeatResult::Alive
        }
    }
}
