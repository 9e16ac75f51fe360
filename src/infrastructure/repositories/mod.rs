//! Repository Implementations
//!
//! Implementations of the domain repository traits.
//!
//! - **PgUserRepository** - user lookups by internal ID or external UID
//! - **PgChatRepository** - rooms, memberships, messages with cursor pagination
//! - **InMemoryChatRepository / InMemoryUserRepository** - database-free
//!   counterparts with the same semantics
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use sqlx::PgPool;
//! use crate::infrastructure::repositories::{PgChatRepository, PgUserRepository};
//!
//! fn setup_repositories(pool: PgPool) {
//!     let users = PgUserRepository::new(pool.clone());
//!     let chat = PgChatRepository::new(pool);
//! }
//! ```

pub mod chat_repository;
pub mod memory;
pub mod user_repository;

pub use chat_repository::PgChatRepository;
pub use memory::{InMemoryChatRepository, InMemoryUserRepository};
pub use user_repository::PgUserRepository;
