//! Per-target handshake state for Remote companion clients.
//!
//! The unit pings on every heartbeat tick; a link becomes Connected only
//! when a pong carries the pending sequence number. Remote links run
//! over UDP with no session guarantee, so `was_connected_before`
//! distinguishes a first connect from a resync after a gap.
//!
//! All timing is passed in, which keeps the machine testable without a
//! running clock.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongOutcome {
    /// Handshake completed; `reconnect` is true when this link was
    /// connected at least once before.
    Established { reconnect: bool },
    /// Heartbeat ack on an already-connected link.
    Heartbeat,
    /// Sequence number does not match the pending ping.
    Stale,
}

#[derive(Debug)]
pub struct RemoteLink {
    state: RemoteState,
    was_connected_before: bool,
    last_ping_sent: Option<Instant>,
    last_pong: Option<Instant>,
    next_seq: i32,
    pending_seq: Option<i32>,
    /// Channel the companion client currently operates on
    pub selected_channel: u16,
}

impl Default for RemoteLink {
    fn default() -> Self {
        Self {
            state: RemoteState::Disconnected,
            was_connected_before: false,
            last_ping_sent: None,
            last_pong: None,
            next_seq: 0,
            pending_seq: None,
            selected_channel: 0,
        }
    }
}

impl RemoteLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RemoteState {
        self.state
    }

    /// Assign the next sequence number and record the send. A link in
    /// Disconnected moves to Connecting here.
    pub fn begin_ping(&mut self, now: Instant) -> i32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.pending_seq = Some(seq);
        self.last_ping_sent = Some(now);
        if self.state == RemoteState::Disconnected {
            self.state = RemoteState::Connecting;
        }
        seq
    }

    pub fn on_pong(&mut self, seq: i32, now: Instant) -> PongOutcome {
        if self.pending_seq != Some(seq) {
            return PongOutcome::Stale;
        }
        self.pending_seq = None;
        self.last_pong = Some(now);
        match self.state {
            RemoteState::Connected => PongOutcome::Heartbeat,
            _ => {
                self.state = RemoteState::Connected;
                let reconnect = self.was_connected_before;
                self.was_connected_before = true;
                PongOutcome::Established { reconnect }
            }
        }
    }

    /// Returns true exactly once when a connected link misses its
    /// heartbeat ack window.
    pub fn check_timeout(&mut self, now: Instant, timeout: Duration) -> bool {
        if self.state != RemoteState::Connected {
            return false;
        }
        let expired = match self.last_pong {
            Some(last) => now.saturating_duration_since(last) > timeout,
            None => true,
        };
        if expired {
            self.state = RemoteState::Disconnected;
            self.pending_seq = None;
        }
        expired
    }

    /// Explicit disconnect from the client side.
    pub fn disconnect(&mut self) {
        self.state = RemoteState::Disconnected;
        self.pending_seq = None;
        self.last_ping_sent = None;
        self.last_pong = None;
    }
}
