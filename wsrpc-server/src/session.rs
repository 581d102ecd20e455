//! Per-connection session state.

use crate::transport::ConnectionId;
use std::time::{Duration, Instant};
use wsrpc_protocol::{CompleteMessage, FrameInfo, ProtocolError, Reassembler};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no message in flight.
    Idle,
    /// A fragmented message is partially received.
    Receiving,
}

/// A connected peer.
///
/// Owns the connection's reassembly buffer; dropping the session drops any
/// partially received message with it.
#[derive(Debug)]
pub struct Session {
    /// Transport-assigned connection ID.
    pub id: ConnectionId,

    /// Reassembly buffer for fragmented messages.
    reassembler: Reassembler,

    /// Completed messages received.
    message_count: u64,

    /// Messages dropped by reassembly errors.
    dropped_count: u64,

    /// Session creation time.
    created_at: Instant,

    /// Last activity time.
    last_activity: Instant,
}

impl Session {
    /// Creates a new session.
    pub fn new(id: ConnectionId, max_message_size: usize) -> Self {
        let now = Instant::now();
        Self {
            id,
            reassembler: Reassembler::with_max_message_size(max_message_size),
            message_count: 0,
            dropped_count: 0,
            created_at: now,
            last_activity: now,
        }
    }

    /// Returns the session state.
    pub fn state(&self) -> SessionState {
        if self.reassembler.is_in_progress() {
            SessionState::Receiving
        } else {
            SessionState::Idle
        }
    }

    /// Feeds one frame delivery into the reassembly buffer.
    pub fn feed(
        &mut self,
        info: &FrameInfo,
        payload: &[u8],
    ) -> Result<Option<CompleteMessage>, ProtocolError> {
        self.touch();
        match self.reassembler.feed(info, payload) {
            Ok(Some(message)) => {
                self.message_count += 1;
                Ok(Some(message))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.dropped_count += 1;
                Err(e)
            }
        }
    }

    /// Records keepalive activity.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Returns the number of bytes of an in-progress message.
    pub fn buffered(&self) -> usize {
        self.reassembler.buffered()
    }

    /// Returns the number of completed messages.
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Returns the number of messages dropped during reassembly.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// Returns the time since last activity.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Returns the session age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
