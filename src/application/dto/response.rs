//! Response DTOs
//!
//! Data structures for API response bodies.

use serde::Serialize;

use crate::domain::{ChatMessage, ChatRoom, MessagePage};

/// Room response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub id: i64,
    pub name: String,
    pub room_type: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ChatRoom> for RoomResponse {
    fn from(room: ChatRoom) -> Self {
        Self {
            id: room.id,
            name: room.name,
            room_type: room.room_type.as_str().to_string(),
            created_at: room.created_at.to_rfc3339(),
            updated_at: room.updated_at.to_rfc3339(),
        }
    }
}

/// Message response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: i64,
    pub room_id: i64,
    pub user_id: i64,
    pub message_type: String,
    pub content: String,
    pub created_at: String,
}

impl From<ChatMessage> for MessageResponse {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.id,
            room_id: message.room_id,
            user_id: message.user_id,
            message_type: message.message_type.as_str().to_string(),
            content: message.content,
            created_at: message.created_at.to_rfc3339(),
        }
    }
}

/// One page of room history
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePageResponse {
    pub messages: Vec<MessageResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<i64>,
}

impl From<MessagePage> for MessagePageResponse {
    fn from(page: MessagePage) -> Self {
        Self {
            messages: page.messages.into_iter().map(MessageResponse::from).collect(),
            next_cursor: page.next_cursor,
        }
    }
}
