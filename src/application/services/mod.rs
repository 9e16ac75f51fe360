//! Application Services
//!
//! Business logic services that coordinate domain operations.
//!
//! ## Available Services
//!
//! - **AuthVerifier**: credential verification against the identity provider
//! - **HistoryService**: room history and room listings for the REST API

pub mod auth_service;
pub mod history_service;

// Re-export auth service types
pub use auth_service::{AuthError, AuthVerifier, Claims, JwtAuthVerifier};

// Re-export history service types
pub use history_service::{ChatHistoryService, HistoryService};

#[cfg(test)]
pub use auth_service::MockAuthVerifier;
