//! Chat room entities and the chat persistence port.
//!
//! Maps to the `chat_rooms`, `chat_room_members` and `chat_messages` tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{ChatMessage, MessagePage, MessageType};
use super::user::User;
use crate::shared::error::AppError;

/// Room kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    /// Room attached to a community event
    #[default]
    Event,
    /// Open group conversation
    Group,
    /// Conversation between two users
    Direct,
}

impl RoomType {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "group" => Self::Group,
            "direct" => Self::Direct,
            _ => Self::Event,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Group => "group",
            Self::Direct => "direct",
        }
    }
}

impl std::fmt::Display for RoomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Maximum room name length, in characters (`chat_rooms.name`).
pub const MAX_ROOM_NAME_LENGTH: usize = 100;

/// A chat room record.
///
/// Maps to the `chat_rooms` table:
/// - id: BIGSERIAL PRIMARY KEY
/// - name: VARCHAR(100) NOT NULL
/// - room_type: VARCHAR(20) NOT NULL DEFAULT 'event'
/// - created_at / updated_at: TIMESTAMPTZ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: i64,
    pub name: String,
    pub room_type: RoomType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An active membership row.
///
/// Maps to `chat_room_members` rows whose `deleted_at` is NULL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    pub id: i64,
    pub user_id: i64,
    pub room_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A user paired with one room they are an active member of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserChatRoom {
    pub user: User,
    pub room: ChatRoom,
}

/// Persistence port for rooms, memberships and messages.
///
/// Membership is soft-deleted: `leave_room` marks the active row as left and
/// a later `join_room` creates a new active row.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Create a new room; the store assigns the ID.
    async fn create_room(&self, name: &str, room_type: RoomType) -> Result<ChatRoom, AppError>;

    /// Find a room by ID.
    async fn find_room_by_id(&self, room_id: i64) -> Result<Option<ChatRoom>, AppError>;

    /// Record an active membership. Returns the existing row if already active.
    async fn join_room(&self, room_id: i64, user_id: i64) -> Result<RoomMember, AppError>;

    /// Mark the active membership as left. No-op for non-members.
    async fn leave_room(&self, room_id: i64, user_id: i64) -> Result<(), AppError>;

    /// Find the active membership for a (room, user) pair.
    async fn find_active_membership(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> Result<Option<RoomMember>, AppError>;

    /// Persist a message.
    async fn write_message(
        &self,
        room_id: i64,
        user_id: i64,
        message_type: MessageType,
        content: &str,
    ) -> Result<ChatMessage, AppError>;

    /// All active memberships with their user and room.
    async fn find_user_chat_rooms(&self) -> Result<Vec<UserChatRoom>, AppError>;

    /// Rooms the user is an active member of.
    async fn find_chat_rooms_by_user(&self, user_id: i64) -> Result<Vec<ChatRoom>, AppError>;

    /// Room history, newest first, strictly older than `cursor` when given.
    async fn find_messages_by_room(
        &self,
        room_id: i64,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<MessagePage, AppError>;
}
