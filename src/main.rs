//! wsrpc - JSON-RPC 2.0 over WebSocket
//!
//! Serves an in-memory settings store to WebSocket peers and pushes every
//! change to all of them as an `update` notification.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use wsrpc_server::metrics::run_http_server;
use wsrpc_server::{
    Config, Metrics, NotificationBroadcaster, Server, ServerConfig, SettingsStore, StateStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if WSRPC_CONFIG is set, then env overrides)
    let config_path = std::env::var("WSRPC_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid configuration ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting wsrpc server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Endpoint: {}", config.network.path);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!("  Max message size: {}", config.limits.max_message_size);
    tracing::info!("  Initial properties: {}", config.properties.len());

    let store = Arc::new(SettingsStore::with_properties(
        config.properties.clone(),
        config.limits.change_channel_capacity,
    ));

    let mut server_config = ServerConfig::from_config(&config);
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        server_config = server_config.with_metrics(metrics.clone());
        tracing::info!("  Metrics: http://{}/metrics", config.metrics.bind_addr);
        Some(metrics)
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let server = Arc::new(Server::new(server_config, store.clone()));

    // One change subscription for the lifetime of the process
    let mut broadcaster = NotificationBroadcaster::new(server.transport());
    if let Some(ref metrics) = metrics {
        broadcaster = broadcaster.with_metrics(metrics.clone());
    }
    let broadcaster = Arc::new(broadcaster);
    let notify_handle = broadcaster.attach(store.as_ref());

    let (http_shutdown, _) = broadcast::channel(1);
    let http_handle = metrics.map(|metrics| {
        let addr = config.metrics.bind_addr;
        let state: Arc<dyn StateStore> = store.clone();
        let shutdown = http_shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = run_http_server(addr, metrics, Some(state), shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        })
    });

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    let shutdown_http = http_shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
        let _ = shutdown_http.send(());
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    if let Some(handle) = http_handle {
        let _ = handle.await;
    }
    notify_handle.abort();

    tracing::info!("Server stopped");
    Ok(())
}
