//! Middleware
//!
//! Tower middleware for request processing.

pub mod auth;
pub mod cors;
pub mod logging;
pub mod rate_limit;

pub use auth::{auth_middleware, bearer_token, AuthUser};
pub use cors::create_cors_layer;
pub use logging::{create_trace_layer, track_metrics};
pub use rate_limit::{
    rate_limit_websocket, RateLimitConfig, RateLimitExceededResponse, RateLimitInfo, RateLimiter,
};
