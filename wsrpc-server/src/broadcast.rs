//! Change notification fan-out.

use crate::metrics::Metrics;
use crate::transport::{OutboundMessage, Transport};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use wsrpc_protocol::{Encoder, Notification};

/// Source of application state and its change events.
pub trait StateStore: Send + Sync {
    /// Subscribes to change events; each event is an object of the
    /// properties that changed.
    fn subscribe(&self) -> broadcast::Receiver<Value>;

    /// Returns the full current state.
    fn snapshot(&self) -> Value;
}

/// Pushes "update" notifications to every connected peer.
///
/// Built once at startup around the transport's send-to-all capability.
/// Never touches per-connection state, and sends never wait on a peer.
pub struct NotificationBroadcaster {
    transport: Arc<dyn Transport>,
    metrics: Option<Arc<Metrics>>,
}

impl NotificationBroadcaster {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Broadcasts one change notification.
    ///
    /// Returns the number of peers it was addressed to.
    pub fn notify(&self, changed: Value) -> usize {
        let peers = self.transport.connection_count();
        if peers == 0 {
            tracing::trace!("No peers connected, skipping update notification");
            return 0;
        }

        let bytes = match Encoder::encode_notification(&Notification::update(changed)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Dropping update notification: {}", e);
                if let Some(ref metrics) = self.metrics {
                    metrics.dropped_total.with_label_values(&["encoding"]).inc();
                }
                return 0;
            }
        };

        tracing::debug!("Broadcasting update ({} bytes) to {} peers", bytes.len(), peers);
        self.transport.send_to_all(OutboundMessage::Text(bytes));

        if let Some(ref metrics) = self.metrics {
            metrics.notifications_total.inc();
        }
        peers
    }

    /// Subscribes to a state store and forwards its changes until the store
    /// closes its channel.
    pub fn attach(self: &Arc<Self>, store: &dyn StateStore) -> tokio::task::JoinHandle<()> {
        let receiver = store.subscribe();
        Self::spawn_forwarder(self.clone(), receiver)
    }

    fn spawn_forwarder(
        broadcaster: Arc<Self>,
        mut receiver: broadcast::Receiver<Value>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(changed) => {
                        broadcaster.notify(changed);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Update notifications lagged, {} changes skipped", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("State store closed its change channel");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingTransport;
    use crate::transport::ConnectionId;
    use serde_json::json;

    struct TestStore {
        sender: broadcast::Sender<Value>,
    }

    impl StateStore for TestStore {
        fn subscribe(&self) -> broadcast::Receiver<Value> {
            self.sender.subscribe()
        }

        fn snapshot(&self) -> Value {
            json!({})
        }
    }

    #[test]
    fn test_notify_fans_out_identical_bytes() {
        let transport = Arc::new(RecordingTransport::new());
        for id in 1..=3 {
            transport.connect(ConnectionId(id));
        }
        let broadcaster = NotificationBroadcaster::new(transport.clone());

        assert_eq!(broadcaster.notify(json!({"brightness": 42})), 3);

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        let first = sent[0].1.clone();
        for (_, message) in &sent {
            assert_eq!(message, &first);
        }

        let value: Value = serde_json::from_slice(first.payload()).unwrap();
        assert_eq!(value["jsonrpc"], json!("2.0"));
        assert_eq!(value["method"], json!("update"));
        assert_eq!(value["params"], json!({"brightness": 42}));
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_notify_without_peers_is_noop() {
        let transport = Arc::new(RecordingTransport::new());
        let broadcaster = NotificationBroadcaster::new(transport.clone());

        assert_eq!(broadcaster.notify(json!({"a": 1})), 0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_attach_forwards_store_changes() {
        let transport = Arc::new(RecordingTransport::new());
        transport.connect(ConnectionId(7));
        let broadcaster = Arc::new(NotificationBroadcaster::new(transport.clone()));

        let (sender, _) = broadcast::channel(8);
        let store = TestStore {
            sender: sender.clone(),
        };
        let task = broadcaster.attach(&store);

        sender.send(json!({"mode": "auto"})).unwrap();
        drop(store);
        drop(sender);
        task.await.unwrap();

        let sent = transport.sent_to(ConnectionId(7));
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], OutboundMessage::Text(_)));
    }
}
