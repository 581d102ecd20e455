//! # wsrpc-server
//!
//! JSON-RPC 2.0 engine over a WebSocket transport.
//!
//! This crate provides:
//! - Per-connection reassembly and request routing
//! - Command dispatch to a pluggable handler
//! - Change notification fan-out to every connected peer
//! - A tokio-tungstenite host with bounded, non-blocking outbound queues
//! - An in-memory settings store
//! - Optional Prometheus metrics

pub mod broadcast;
pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod router;
pub mod server;
pub mod session;
pub mod settings;
pub mod transport;
pub mod websocket;

pub use broadcast::{NotificationBroadcaster, StateStore};
pub use config::{Config, ConfigError, LimitsConfig, MetricsConfig, NetworkConfig};
pub use error::ServerError;
pub use handler::{CommandHandler, CommandOutcome, Dispatcher};
pub use metrics::Metrics;
pub use router::ConnectionRouter;
pub use server::{Server, ServerConfig};
pub use session::{Session, SessionState};
pub use settings::SettingsStore;
pub use transport::{ConnectionId, OutboundMessage, Transport, TransportEvent};
pub use websocket::WsTransport;
