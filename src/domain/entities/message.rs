//! Chat message entity.
//!
//! Maps to the `chat_messages` table in the database schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted message content length, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Default page size for history queries.
pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Largest page size for history queries.
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Kind of chat message.
///
/// `Event` marks system notices (joins, leaves) that travel through the same
/// persist-then-broadcast path as user messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Regular user message
    #[default]
    Normal,
    /// System notice
    Event,
}

impl MessageType {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "event" => Self::Event,
            _ => Self::Normal,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Event => "event",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted chat message.
///
/// Maps to the `chat_messages` table:
/// - id: BIGSERIAL PRIMARY KEY
/// - room_id: BIGINT NOT NULL REFERENCES chat_rooms(id)
/// - user_id: BIGINT NOT NULL REFERENCES users(id)
/// - message_type: VARCHAR(20) NOT NULL DEFAULT 'normal'
/// - content: TEXT NOT NULL
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub room_id: i64,
    pub user_id: i64,
    pub message_type: MessageType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One page of room history, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,

    /// Pass back as `cursor` to fetch the next (older) page
    pub next_cursor: Option<i64>,
}

impl MessagePage {
    /// Build a page, deriving the next cursor from a full page.
    pub fn from_messages(messages: Vec<ChatMessage>, limit: i64) -> Self {
        let next_cursor = if messages.len() as i64 >= limit {
            messages.iter().map(|m| m.id).min()
        } else {
            None
        };
        Self {
            messages,
            next_cursor,
        }
    }
}

/// Clamp a requested page size into `1..=MAX_PAGE_LIMIT`.
pub fn clamp_page_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}
