//! WebSocket server implementation.

use crate::config::Config;
use crate::error::ServerError;
use crate::handler::{CommandHandler, Dispatcher};
use crate::metrics::Metrics;
use crate::router::ConnectionRouter;
use crate::transport::{ConnectionId, OutboundMessage, Transport, TransportEvent};
use crate::websocket::WsTransport;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use wsrpc_protocol::{MessageKind, DEFAULT_MAX_MESSAGE_SIZE};

/// Close code reported when a connection drops without a close handshake.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Endpoint path accepted for WebSocket upgrades.
    pub path: String,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum reassembled message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity.
    pub outbound_queue: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("path", &self.path)
            .field("max_connections", &self.max_connections)
            .field("max_message_size", &self.max_message_size)
            .field("outbound_queue", &self.outbound_queue)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            path: "/api/v1".to_string(),
            max_connections: 16,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_queue: 32,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds the server configuration from loaded config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            path: config.network.path.clone(),
            max_connections: config.network.max_connections,
            max_message_size: config.limits.max_message_size,
            outbound_queue: config.limits.outbound_queue,
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }

    /// Read limits applied by the WebSocket layer before a message is buffered.
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.max_message_size);
        ws_config.max_frame_size = Some(self.max_message_size);
        ws_config
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub errors_total: AtomicU64,
}

/// WebSocket server for wsrpc.
pub struct Server {
    config: ServerConfig,
    router: Arc<ConnectionRouter>,
    transport: Arc<WsTransport>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server around a command handler.
    pub fn new(config: ServerConfig, handler: Arc<dyn CommandHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        let mut transport = WsTransport::new(config.outbound_queue);
        if let Some(ref metrics) = config.metrics {
            transport = transport.with_metrics(metrics.clone());
        }
        let transport = Arc::new(transport);

        let mut router = ConnectionRouter::new(
            Dispatcher::new(handler),
            transport.clone(),
            config.max_message_size,
        );
        if let Some(ref metrics) = config.metrics {
            router = router.with_metrics(metrics.clone());
        }

        Self {
            config,
            router: Arc::new(router),
            transport,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Returns the send side of the transport, for wiring the broadcaster.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Returns the connection router.
    pub fn router(&self) -> &Arc<ConnectionRouter> {
        &self.router
    }

    /// Runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accepts connections on a bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Server listening on ws://{}{}",
            listener.local_addr()?,
            self.config.path
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!(
                                    "Rejecting {}: {}",
                                    addr,
                                    ServerError::ConnectionLimit(self.config.max_connections)
                                );
                                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let router = self.router.clone();
                            let transport = self.transport.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = Self::handle_connection(
                                    tcp_stream,
                                    addr,
                                    &config,
                                    router,
                                    transport,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);

                                if let Some(ref metrics) = config.metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Upgrades one TCP connection and pumps its events into the router.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        config: &ServerConfig,
        router: Arc<ConnectionRouter>,
        transport: Arc<WsTransport>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let expected = config.path.clone();
        let check_path = move |req: &Request, response: Response| {
            if req.uri().path() == expected {
                Ok(response)
            } else {
                tracing::debug!("[{}] Rejecting upgrade on {}", addr, req.uri().path());
                let mut reject = ErrorResponse::new(Some("Not Found".to_string()));
                *reject.status_mut() = StatusCode::NOT_FOUND;
                Err(reject)
            }
        };
        let ws =
            accept_hdr_async_with_config(stream, check_path, Some(config.websocket_config()))
                .await?;

        let (id, outbound) = transport.register();
        tracing::info!("Client connected: {} (connection {})", addr, id);
        router.handle_event(id, TransportEvent::Connect);

        let result = Self::pump(ws, id, &router, outbound, shutdown).await;

        transport.unregister(id);
        let closing = match result {
            Ok(()) | Err(ServerError::ShuttingDown) => TransportEvent::Disconnect,
            Err(ref e) => TransportEvent::Error {
                code: ABNORMAL_CLOSURE,
                reason: e.to_string(),
            },
        };
        router.handle_event(id, closing);
        result
    }

    async fn pump(
        ws: WebSocketStream<TcpStream>,
        id: ConnectionId,
        router: &ConnectionRouter,
        mut outbound: mpsc::Receiver<OutboundMessage>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                Some(message) = outbound.recv() => {
                    tracing::trace!(
                        "[{}] Writing {} message ({} bytes)",
                        id,
                        message.kind().as_str(),
                        message.payload().len()
                    );
                    let frame = match message {
                        OutboundMessage::Text(bytes) => match Utf8Bytes::try_from(bytes) {
                            Ok(text) => Message::Text(text),
                            Err(e) => {
                                tracing::warn!("[{}] Dropping non-UTF-8 text message: {}", id, e);
                                continue;
                            }
                        },
                        OutboundMessage::Binary(bytes) => Message::Binary(bytes),
                    };
                    sink.send(frame).await?;
                }

                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            router.handle_event(
                                id,
                                TransportEvent::whole(MessageKind::Text, Bytes::from(text)),
                            );
                        }
                        Some(Ok(Message::Binary(data))) => {
                            router.handle_event(id, TransportEvent::whole(MessageKind::Binary, data));
                        }
                        Some(Ok(Message::Pong(data))) => {
                            router.handle_event(id, TransportEvent::Pong(data));
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::debug!("[{}] Connection closed by client", id);
                            return Ok(());
                        }
                        Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            tracing::debug!("[{}] Read error: {}", id, e);
                            return Err(ServerError::WebSocket(e));
                        }
                    }
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", id);
                    let _ = sink.send(Message::Close(None)).await;
                    return Err(ServerError::ShuttingDown);
                }
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
