//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - HTTP request counts and latency
//! - Active WebSocket connections and live rooms
//! - Chat messages broadcast, dropped outbound frames, persistence failures

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// HTTP request counter - tracks total requests by method, path, and status code
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace("pawchat"),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP_REQUESTS_TOTAL metric")
});

/// HTTP request latency histogram - tracks request duration in seconds
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .namespace("pawchat")
        .buckets(buckets),
        &["method", "path"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Active WebSocket connections gauge
pub static WEBSOCKET_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "websocket_connections_active",
            "Number of registered chat connections",
        )
        .namespace("pawchat"),
    )
    .expect("Failed to create WEBSOCKET_CONNECTIONS_ACTIVE metric")
});

/// Live in-memory rooms gauge
pub static CHAT_ROOMS_LIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("chat_rooms_live", "Number of rooms with a running event loop")
            .namespace("pawchat"),
    )
    .expect("Failed to create CHAT_ROOMS_LIVE metric")
});

/// Messages persisted and fanned out, by message type
pub static CHAT_MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("chat_messages_total", "Chat messages persisted and broadcast")
            .namespace("pawchat"),
        &["message_type"],
    )
    .expect("Failed to create CHAT_MESSAGES_TOTAL metric")
});

/// Outbound frames dropped because a connection queue was full
pub static CHAT_OUTBOUND_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "chat_outbound_dropped_total",
            "Outbound frames dropped on a full connection queue",
        )
        .namespace("pawchat"),
    )
    .expect("Failed to create CHAT_OUTBOUND_DROPPED_TOTAL metric")
});

/// Messages rejected because persistence failed
pub static CHAT_PERSIST_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "chat_persist_failures_total",
            "Chat messages dropped because persistence failed",
        )
        .namespace("pawchat"),
    )
    .expect("Failed to create CHAT_PERSIST_FAILURES_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("Failed to register HTTP_REQUESTS_TOTAL");
    registry
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");
    registry
        .register(Box::new(WEBSOCKET_CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register WEBSOCKET_CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(CHAT_ROOMS_LIVE.clone()))
        .expect("Failed to register CHAT_ROOMS_LIVE");
    registry
        .register(Box::new(CHAT_MESSAGES_TOTAL.clone()))
        .expect("Failed to register CHAT_MESSAGES_TOTAL");
    registry
        .register(Box::new(CHAT_OUTBOUND_DROPPED_TOTAL.clone()))
        .expect("Failed to register CHAT_OUTBOUND_DROPPED_TOTAL");
    registry
        .register(Box::new(CHAT_PERSIST_FAILURES_TOTAL.clone()))
        .expect("Failed to register CHAT_PERSIST_FAILURES_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, status.as_str()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

/// Set the registered connection count
pub fn set_websocket_connections(count: usize) {
    WEBSOCKET_CONNECTIONS_ACTIVE.set(count as i64);
}

/// Set the live room count
pub fn set_live_rooms(count: usize) {
    CHAT_ROOMS_LIVE.set(count as i64);
}

/// Count a persisted and broadcast message
pub fn record_chat_message(message_type: &str) {
    CHAT_MESSAGES_TOTAL.with_label_values(&[message_type]).inc();
}

/// Count a dropped outbound frame
pub fn record_outbound_drop() {
    CHAT_OUTBOUND_DROPPED_TOTAL.inc();
}

/// Count a persistence failure on the broadcast path
pub fn record_persist_failure() {
    CHAT_PERSIST_FAILURES_TOTAL.inc();
}
