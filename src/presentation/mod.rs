//! Presentation Layer
//!
//! HTTP routes, middleware and the chat WebSocket core.

pub mod http;
pub mod middleware;
pub mod websocket;
