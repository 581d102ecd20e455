//! Transport capability consumed by the engine.
//!
//! The transport owns sockets and framing. The engine only sees lifecycle
//! events per connection and hands back outbound messages.

use bytes::Bytes;
use std::fmt;
use wsrpc_protocol::{FrameInfo, MessageKind};

/// Opaque connection identifier allocated by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle event delivered for one connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connect,
    Disconnect,
    Error { code: u16, reason: String },
    Pong(Bytes),
    Data { info: FrameInfo, payload: Bytes },
}

impl TransportEvent {
    /// Data event for a message delivered whole.
    pub fn whole(kind: MessageKind, payload: Bytes) -> Self {
        TransportEvent::Data {
            info: FrameInfo::whole(kind, payload.len()),
            payload,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Connect => "connect",
            TransportEvent::Disconnect => "disconnect",
            TransportEvent::Error { .. } => "error",
            TransportEvent::Pong(_) => "pong",
            TransportEvent::Data { .. } => "data",
        }
    }
}

/// Message handed to the transport for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(Bytes),
    Binary(Bytes),
}

impl OutboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            OutboundMessage::Text(_) => MessageKind::Text,
            OutboundMessage::Binary(_) => MessageKind::Binary,
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            OutboundMessage::Text(b) | OutboundMessage::Binary(b) => b,
        }
    }
}

/// Outbound half of the transport.
///
/// Sends are fire-and-forget and must never block: an implementation that
/// cannot queue a message drops it.
pub trait Transport: Send + Sync {
    /// Sends a message to one connection.
    fn send_to_one(&self, id: ConnectionId, message: OutboundMessage);

    /// Sends a message to every connected peer.
    fn send_to_all(&self, message: OutboundMessage);

    /// Returns the number of connected peers.
    fn connection_count(&self) -> usize;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording transport used by router and broadcaster tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    #[derive(Default)]
    pub struct RecordingTransport {
        peers: Mutex<BTreeSet<ConnectionId>>,
        sent: Mutex<Vec<(ConnectionId, OutboundMessage)>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn connect(&self, id: ConnectionId) {
            self.peers.lock().insert(id);
        }

        pub fn disconnect(&self, id: ConnectionId) {
            self.peers.lock().remove(&id);
        }

        pub fn sent(&self) -> Vec<(ConnectionId, OutboundMessage)> {
            self.sent.lock().clone()
        }

        pub fn sent_to(&self, id: ConnectionId) -> Vec<OutboundMessage> {
            self.sent
                .lock()
                .iter()
                .filter(|(to, _)| *to == id)
                .map(|(_, m)| m.clone())
                .collect()
        }

        pub fn clear(&self) {
            self.sent.lock().clear();
        }
    }

    impl Transport for RecordingTransport {
        fn send_to_one(&self, id: ConnectionId, message: OutboundMessage) {
            self.sent.lock().push((id, message));
        }

        fn send_to_all(&self, message: OutboundMessage) {
            let peers: Vec<_> = self.peers.lock().iter().copied().collect();
            let mut sent = self.sent.lock();
            for id in peers {
                sent.push((id, message.clone()));
            }
        }

        fn connection_count(&self) -> usize {
            self.peers.lock().len()
        }
    }
}
