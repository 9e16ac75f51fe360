//! # Pawchat
//!
//! Real-time room chat for the pet community backend:
//! - WebSocket chat core: live rooms with serialized event loops,
//!   persist-then-broadcast messaging, reconnect seeding
//! - REST endpoints for room creation and message history
//! - PostgreSQL persistence behind the chat repository port
//!
//! ## Architecture
//!
//! - **Domain Layer**: Records and repository traits
//! - **Application Layer**: Auth verification, history service, DTOs
//! - **Infrastructure Layer**: PostgreSQL and in-memory repositories, metrics
//! - **Presentation Layer**: HTTP handlers, middleware and the chat gateway
//!
//! ## Module Structure
//!
//! ```text
//! pawchat/
//! +-- config/         Configuration management
//! +-- domain/         Entities and repository traits
//! +-- application/    Services and DTOs
//! +-- infrastructure/ Database, repositories, metrics
//! +-- presentation/   HTTP routes, middleware, WebSocket chat core
//! +-- shared/         Common utilities (errors, validation)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Business services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
