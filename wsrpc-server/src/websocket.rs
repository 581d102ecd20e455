//! Outbound side of the WebSocket transport.
//!
//! Every connection owns a bounded queue drained by its socket task. Sends
//! only ever `try_send` into those queues, so a slow peer loses messages
//! instead of stalling the caller or other peers.

use crate::metrics::Metrics;
use crate::transport::{ConnectionId, OutboundMessage, Transport};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Registry of live WebSocket connections and their outbound queues.
pub struct WsTransport {
    peers: DashMap<ConnectionId, mpsc::Sender<OutboundMessage>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    metrics: Option<Arc<Metrics>>,
}

impl WsTransport {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            peers: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Allocates a connection ID and its outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<OutboundMessage>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.peers.insert(id, tx);
        (id, rx)
    }

    /// Drops a connection's outbound queue.
    pub fn unregister(&self, id: ConnectionId) {
        self.peers.remove(&id);
    }

    fn enqueue(
        &self,
        id: ConnectionId,
        tx: &mpsc::Sender<OutboundMessage>,
        message: OutboundMessage,
    ) {
        match tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("[{}] Outbound queue full, dropping message", id);
                if let Some(ref metrics) = self.metrics {
                    metrics.dropped_total.with_label_values(&["queue_full"]).inc();
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("[{}] Outbound queue closed", id);
            }
        }
    }
}

impl Transport for WsTransport {
    fn send_to_one(&self, id: ConnectionId, message: OutboundMessage) {
        // No shard lock held across the send
        let tx = self.peers.get(&id).map(|entry| entry.value().clone());
        match tx {
            Some(tx) => self.enqueue(id, &tx, message),
            None => tracing::debug!("[{}] Send to unknown connection dropped", id),
        }
    }

    fn send_to_all(&self, message: OutboundMessage) {
        let peers: Vec<_> = self
            .peers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (id, tx) in peers {
            self.enqueue(id, &tx, message.clone());
        }
    }

    fn connection_count(&self) -> usize {
        self.peers.len()
    }
}
