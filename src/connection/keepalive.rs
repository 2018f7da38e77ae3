//! Ping/pong keepalive bookkeeping.
//!
//! A single deadline drives everything. When it passes, a ping goes out if
//! the previous one was answered; otherwise the peer is considered gone. The
//! next deadline is computed from the previous one, not from the current
//! time, so late wakeups do not accumulate drift.

use std::ops::Add;
use std::time::Duration;

/// What to do when the ping deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// Send a ping and wait for its pong.
    Ping,
    /// The last ping was never answered.
    TimedOut,
}

/// Keepalive timer state, generic over the clock's instant type so the
/// blocking engine can use `std::time::Instant` and the async engine
/// `tokio::time::Instant`.
#[derive(Debug, Clone)]
pub(crate) struct Keepalive<I> {
    interval: Duration,
    next_ping: I,
    pong_received: bool,
}

impl<I> Keepalive<I>
where
    I: Copy + Add<Duration, Output = I>,
{
    pub(crate) fn new(now: I, interval: Duration) -> Self {
        Self {
            interval,
            next_ping: now + interval,
            // Nothing is outstanding yet, so the first deadline sends a ping.
            pong_received: true,
        }
    }

    pub(crate) fn deadline(&self) -> I {
        self.next_ping
    }

    /// Called once the deadline has passed.
    pub(crate) fn on_deadline(&mut self) -> Tick {
        if !self.pong_received {
            return Tick::TimedOut;
        }
        self.pong_received = false;
        self.next_ping = self.next_ping + self.interval;
        Tick::Ping
    }

    pub(crate) fn on_pong(&mut self) {
        self.pong_received = true;
    }
}
