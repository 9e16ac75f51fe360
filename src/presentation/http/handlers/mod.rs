//! HTTP Handlers
//!
//! Request handlers for the REST endpoints.

pub mod health;
pub mod room;
