//! User entity and repository trait.
//!
//! Maps to the `users` table. Accounts are owned by the external identity
//! provider; the chat core only resolves them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Represents a user known to the chat system.
///
/// Maps to the `users` table:
/// - id: BIGSERIAL PRIMARY KEY (internal numeric ID)
/// - uid: VARCHAR(128) NOT NULL UNIQUE (external-auth UID)
/// - name: VARCHAR(64) NOT NULL
/// - created_at / updated_at: TIMESTAMPTZ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Internal numeric ID
    pub id: i64,

    /// Stable external-auth UID, used as the chat identity
    pub uid: String,

    /// Display name shown to other room members
    pub name: String,

    /// Account creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Build a user record with fresh timestamps.
    pub fn new(id: i64, uid: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            uid: uid.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Repository trait for user lookups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find a user by internal ID.
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError>;

    /// Find a user by external-auth UID.
    async fn find_by_uid(&self, uid: &str) -> Result<Option<User>, AppError>;
}
