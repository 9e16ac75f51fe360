//! Rate Limiting Middleware
//!
//! In-process sliding-window rate limiting for the chat upgrade route.
//! Each client identifier keeps the timestamps of its recent requests;
//! entries older than the window are discarded on every check.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::RateLimitSettings;
use crate::shared::error::{AppError, ErrorResponse};
use crate::startup::AppState;

// ============================================================================
// Rate Limit Configuration
// ============================================================================

/// Configuration for rate limiting behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub requests_per_window: u32,
    /// Window duration in seconds
    pub window_seconds: u64,
    /// Burst allowance above base limit
    pub burst_allowance: u32,
}

impl RateLimitConfig {
    fn max_requests(&self) -> u32 {
        self.requests_per_window + self.burst_allowance
    }

    fn window_ms(&self) -> i64 {
        (self.window_seconds * 1000) as i64
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            requests_per_window: settings.websocket_per_minute,
            window_seconds: 60,
            burst_allowance: settings.burst,
        }
    }
}

// ============================================================================
// Rate Limit Response
// ============================================================================

/// Information about rate limit status returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Maximum requests allowed in the current window
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Unix timestamp when the window resets
    pub reset_at: i64,
    /// Seconds until the client may retry (only meaningful when limited)
    pub retry_after: u64,
}

/// Body of a 429 response.
#[derive(Debug, Serialize)]
pub struct RateLimitExceededResponse {
    #[serde(flatten)]
    pub error: ErrorResponse,
    pub rate_limit: RateLimitInfo,
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Sliding-window limiter keyed by client identifier.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, VecDeque<i64>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Check and record a request at the current time.
    pub fn check(&self, identifier: &str) -> Result<RateLimitInfo, RateLimitInfo> {
        self.check_at(identifier, Utc::now().timestamp_millis())
    }

    /// Check and record a request at `now_ms` (Unix milliseconds).
    pub fn check_at(&self, identifier: &str, now_ms: i64) -> Result<RateLimitInfo, RateLimitInfo> {
        let max_requests = self.config.max_requests();
        let window_ms = self.config.window_ms();
        let window_start = now_ms - window_ms;

        let mut window = self.windows.entry(identifier.to_owned()).or_default();
        while window.front().is_some_and(|&t| t <= window_start) {
            window.pop_front();
        }

        let current = window.len() as u32;
        let reset_at = (window.front().copied().unwrap_or(now_ms) + window_ms) / 1000;

        if current < max_requests {
            window.push_back(now_ms);
            Ok(RateLimitInfo {
                limit: max_requests,
                remaining: max_requests - current - 1,
                reset_at,
                retry_after: 0,
            })
        } else {
            let retry_ms = window
                .front()
                .map(|&oldest| oldest + window_ms - now_ms)
                .unwrap_or(0)
                .max(0);
            Err(RateLimitInfo {
                limit: max_requests,
                remaining: 0,
                reset_at,
                retry_after: Duration::from_millis(retry_ms as u64).as_secs_f64().ceil() as u64,
            })
        }
    }

    /// Drop identifiers whose window is empty at `now_ms`.
    pub fn purge_idle(&self, now_ms: i64) {
        let window_start = now_ms - self.config.window_ms();
        self.windows
            .retain(|_, window| window.back().is_some_and(|&t| t > window_start));
    }

    /// Number of identifiers currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

/// Extract the client identifier for rate limiting.
///
/// X-Forwarded-For is only meaningful behind a trusted proxy.
fn extract_identifier(headers: &HeaderMap, client_ip: Option<IpAddr>) -> String {
    // First IP in the chain is the original client
    if let Some(forwarded_for) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(first_ip) = forwarded_for.split(',').next() {
            let ip = first_ip.trim();
            if ip.parse::<IpAddr>().is_ok() {
                return format!("ip:{}", ip);
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
        let ip = real_ip.trim();
        if ip.parse::<IpAddr>().is_ok() {
            return format!("ip:{}", ip);
        }
    }

    match client_ip {
        Some(ip) => format!("ip:{}", ip),
        None => {
            tracing::warn!("Could not determine client identifier for rate limiting");
            "ip:unknown".to_string()
        }
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Rate limiting middleware for WebSocket connections.
pub async fn rate_limit_websocket(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = extract_identifier(request.headers(), peer_ip(&request));

    match state.rate_limiter.check(&identifier) {
        Ok(info) => {
            let mut response = next.run(request).await;
            add_rate_limit_headers(response.headers_mut(), &info);
            response
        }
        Err(info) => {
            tracing::warn!(identifier = %identifier, "Rate limit exceeded");
            create_rate_limit_response(info)
        }
    }
}

/// Peer address recorded by `into_make_service_with_connect_info`, if any.
fn peer_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Add rate limit headers to a response.
fn add_rate_limit_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    if let Ok(v) = header::HeaderValue::from_str(&info.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = header::HeaderValue::from_str(&info.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = header::HeaderValue::from_str(&info.reset_at.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}

/// Create a 429 Too Many Requests response.
fn create_rate_limit_response(info: RateLimitInfo) -> Response {
    let (_, code) = AppError::RateLimited.status_and_code();
    let retry_after = info.retry_after;
    let mut headers = HeaderMap::new();
    add_rate_limit_headers(&mut headers, &info);

    let body = RateLimitExceededResponse {
        error: ErrorResponse {
            code,
            message: "You are being rate limited. Please slow down.".to_string(),
            errors: None,
        },
        rate_limit: info,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response.headers_mut().extend(headers);
    if let Ok(v) = header::HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, v);
    }

    response
}
