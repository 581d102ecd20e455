//! Connection event routing.
//!
//! Drives the per-connection lifecycle `Connect -> {Data}* -> {Disconnect |
//! Error}`. Completed text messages go through decode, dispatch, and encode
//! and the response is sent back to the originating connection. Completed
//! binary messages get a fixed acknowledgment.

use crate::handler::Dispatcher;
use crate::metrics::Metrics;
use crate::session::{Session, SessionState};
use crate::transport::{ConnectionId, OutboundMessage, Transport, TransportEvent};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use wsrpc_protocol::{CompleteMessage, Decoder, Encoder, FrameInfo, ProtocolError};

/// Reply sent for every completed binary message.
pub const BINARY_ACK: &[u8] = b"I got your binary message";

/// Routes transport events to per-connection sessions.
///
/// Each session sits behind its own lock, so frames for one connection are
/// applied one at a time while different connections proceed independently.
/// The lock is released before dispatching or sending.
pub struct ConnectionRouter {
    sessions: DashMap<ConnectionId, Arc<Mutex<Session>>>,
    dispatcher: Dispatcher,
    transport: Arc<dyn Transport>,
    max_message_size: usize,
    metrics: Option<Arc<Metrics>>,
}

impl ConnectionRouter {
    pub fn new(
        dispatcher: Dispatcher,
        transport: Arc<dyn Transport>,
        max_message_size: usize,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            dispatcher,
            transport,
            max_message_size,
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handles one lifecycle event for a connection.
    pub fn handle_event(&self, id: ConnectionId, event: TransportEvent) {
        tracing::trace!("[{}] {} event", id, event.name());
        match event {
            TransportEvent::Connect => self.on_connect(id),
            TransportEvent::Disconnect => self.on_close(id, None),
            TransportEvent::Error { code, reason } => self.on_close(id, Some((code, reason))),
            TransportEvent::Pong(_) => {
                if let Some(session) = self.session(id) {
                    session.lock().touch();
                }
            }
            TransportEvent::Data { info, payload } => self.on_data(id, &info, &payload),
        }
    }

    /// Returns the number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns whether a connection has a live session.
    pub fn has_session(&self, id: ConnectionId) -> bool {
        self.sessions.contains_key(&id)
    }

    fn session(&self, id: ConnectionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    fn on_connect(&self, id: ConnectionId) {
        let session = Session::new(id, self.max_message_size);
        if self
            .sessions
            .insert(id, Arc::new(Mutex::new(session)))
            .is_some()
        {
            tracing::warn!("[{}] Connect for a live connection, session replaced", id);
        } else {
            tracing::debug!("[{}] Session opened", id);
        }
    }

    fn on_close(&self, id: ConnectionId, error: Option<(u16, String)>) {
        let Some((_, session)) = self.sessions.remove(&id) else {
            tracing::debug!("[{}] Close for unknown connection", id);
            return;
        };

        let session = session.lock();
        if session.state() == SessionState::Receiving {
            tracing::debug!(
                "[{}] Discarding {} bytes of a partial message",
                id,
                session.buffered()
            );
            self.count_drop("abandoned");
        }
        match error {
            Some((code, reason)) => tracing::debug!(
                "[{}] Connection error {}: {} ({} messages, {} dropped, open {:?}, idle {:?})",
                id,
                code,
                reason,
                session.message_count(),
                session.dropped_count(),
                session.age(),
                session.idle_duration()
            ),
            None => tracing::debug!(
                "[{}] Session closed ({} messages, {} dropped, open {:?}, idle {:?})",
                id,
                session.message_count(),
                session.dropped_count(),
                session.age(),
                session.idle_duration()
            ),
        }
    }

    fn on_data(&self, id: ConnectionId, info: &FrameInfo, payload: &[u8]) {
        let Some(session) = self.session(id) else {
            tracing::debug!("[{}] Data for unknown connection, ignoring", id);
            return;
        };

        let result = session.lock().feed(info, payload);
        match result {
            Ok(Some(message)) => self.on_message(id, message),
            Ok(None) => {}
            Err(e) => self.on_reassembly_error(id, e),
        }
    }

    fn on_message(&self, id: ConnectionId, message: CompleteMessage) {
        if let Some(ref metrics) = self.metrics {
            metrics
                .messages_total
                .with_label_values(&[message.kind.as_str()])
                .inc();
        }

        if message.is_text() {
            self.on_text(id, &message.payload);
        } else {
            tracing::debug!("[{}] Binary message ({} bytes)", id, message.len());
            self.transport.send_to_one(
                id,
                OutboundMessage::Binary(Bytes::from_static(BINARY_ACK)),
            );
        }
    }

    fn on_text(&self, id: ConnectionId, payload: &[u8]) {
        let request = match Decoder::decode_request(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("[{}] Dropping malformed request: {}", id, e);
                self.count_drop("malformed");
                return;
            }
        };

        tracing::debug!(
            "[{}] Request: {} (id={})",
            id,
            request.method,
            request
                .id
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string)
        );

        let start = Instant::now();
        let response = self.dispatcher.handle(&request);
        if let Some(ref metrics) = self.metrics {
            metrics
                .dispatch_duration
                .with_label_values(&[if request.is_notification() {
                    "notification"
                } else {
                    "request"
                }])
                .observe(start.elapsed().as_secs_f64());
        }

        let Some(response) = response else {
            return;
        };

        match Encoder::encode_response(&response) {
            Ok(bytes) => {
                if let Some(ref metrics) = self.metrics {
                    let outcome = if response.is_error() { "error" } else { "result" };
                    metrics.responses_total.with_label_values(&[outcome]).inc();
                }
                self.transport.send_to_one(id, OutboundMessage::Text(bytes));
            }
            Err(e) => {
                tracing::warn!("[{}] Dropping response: {}", id, e);
                self.count_drop("encoding");
            }
        }
    }

    fn on_reassembly_error(&self, id: ConnectionId, error: ProtocolError) {
        match error {
            ProtocolError::MessageTooLarge { .. } => {
                tracing::warn!("[{}] Dropping message: {}", id, error);
                self.count_drop("too_large");
            }
            _ => {
                tracing::warn!("[{}] Abandoned message: {}", id, error);
                self.count_drop("reassembly");
            }
        }
    }

    fn count_drop(&self, reason: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.dropped_total.with_label_values(&[reason]).inc();
        }
    }
}
