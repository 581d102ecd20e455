//! Prometheus metrics and the HTTP side endpoint.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server exposing `/metrics`, `/health`, and the read-only
//!   `/api/v1/ping` and `/api/v1/state` routes

use crate::broadcast::StateStore;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Dispatch duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1];

/// Prometheus metrics for the wsrpc server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently active connections.
    pub connections_active: Gauge,
    /// Completed inbound messages by kind.
    pub messages_total: CounterVec,
    /// Responses sent by outcome.
    pub responses_total: CounterVec,
    /// Dropped messages by reason.
    pub dropped_total: CounterVec,
    /// Update notifications broadcast.
    pub notifications_total: Counter,
    /// Dispatch duration histogram by request kind.
    pub dispatch_duration: HistogramVec,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total = Counter::with_opts(Opts::new(
            "wsrpc_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "wsrpc_connections_active",
            "Number of currently active connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        let messages_total = CounterVec::new(
            Opts::new("wsrpc_messages_total", "Completed inbound messages by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let responses_total = CounterVec::new(
            Opts::new("wsrpc_responses_total", "Responses sent by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(responses_total.clone()))?;

        let dropped_total = CounterVec::new(
            Opts::new("wsrpc_dropped_total", "Dropped messages by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(dropped_total.clone()))?;

        let notifications_total = Counter::with_opts(Opts::new(
            "wsrpc_notifications_total",
            "Total update notifications broadcast",
        ))?;
        registry.register(Box::new(notifications_total.clone()))?;

        let dispatch_duration = HistogramVec::new(
            HistogramOpts::new(
                "wsrpc_dispatch_duration_seconds",
                "Command dispatch duration in seconds",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["kind"],
        )?;
        registry.register(Box::new(dispatch_duration.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            messages_total,
            responses_total,
            dropped_total,
            notifications_total,
            dispatch_duration,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

/// Runs the HTTP side server.
///
/// Serves metrics at `/metrics` and, when a state store is given, its
/// snapshot at `/api/v1/state`.
pub async fn run_http_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    store: Option<Arc<dyn StateStore>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        let store = store.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let store = store.clone();
                                async move { handle_request(req, metrics, store).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("HTTP connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("HTTP server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("HTTP server shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    store: Option<Arc<dyn StateStore>>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.method(), req.uri().path(), &metrics, store.as_deref()))
}

fn route(
    method: &hyper::Method,
    path: &str,
    metrics: &Metrics,
    store: Option<&dyn StateStore>,
) -> Response<Full<Bytes>> {
    let (status, content_type, body) = match (method, path) {
        (&hyper::Method::GET, "/metrics") => (
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            Bytes::from(metrics.encode()),
        ),
        (&hyper::Method::GET, "/health" | "/healthz") => {
            (StatusCode::OK, "text/plain", Bytes::from_static(b"OK"))
        }
        (&hyper::Method::GET, "/api/v1/ping") => {
            (StatusCode::OK, "text/plain", Bytes::from_static(b"pong"))
        }
        (&hyper::Method::GET, "/api/v1/state") => match store {
            Some(store) => (
                StatusCode::OK,
                "application/json",
                Bytes::from(store.snapshot().to_string()),
            ),
            None => (StatusCode::NOT_FOUND, "text/plain", Bytes::new()),
        },
        (&hyper::Method::OPTIONS, _) => (StatusCode::OK, "text/plain", Bytes::new()),
        _ => (
            StatusCode::NOT_FOUND,
            "text/plain",
            Bytes::from_static(b"Not Found"),
        ),
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}
