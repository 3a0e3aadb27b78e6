//! Heartbeat monitor with PING/PING_OK tokens and RTT measurement.
//!
//! The monitor is plain state; the connection engine feeds it timestamps and
//! asks it when the next ping is due and when the peer counts as lost.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Liveness bookkeeping for one established session
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    last_sent: Instant,
    last_received: Instant,
    outstanding: Option<u8>,
}

impl Heartbeat {
    /// Create a monitor whose clocks start at `now`
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            last_sent: now,
            last_received: now,
            outstanding: None,
        }
    }

    /// When the next PING should go out
    pub fn next_ping_at(&self) -> Instant {
        self.last_sent + self.interval
    }

    /// Record a PING going out and return its token
    pub fn prepare_ping(&mut self, now: Instant) -> u8 {
        let token = rand::thread_rng().gen_range(1..=253);
        self.last_sent = now;
        self.outstanding = Some(token);
        token
    }

    /// Peer pinged us
    pub fn on_ping(&mut self, now: Instant) {
        self.last_received = now;
    }

    /// Peer answered a PING. Returns the round trip if the token matched.
    pub fn on_ping_ok(&mut self, token: u8, now: Instant) -> Option<Duration> {
        self.last_received = now;
        if self.outstanding != Some(token) {
            return None;
        }
        self.outstanding = None;
        Some(now.saturating_duration_since(self.last_sent))
    }

    /// Any other inbound unit
    pub fn on_traffic(&mut self, now: Instant) {
        self.last_received = now;
    }

    /// Point at which silence from the peer becomes a lost connection
    pub fn deadline(&self) -> Instant {
        self.last_received + self.timeout
    }
}
