//! Chat wire protocol.
//!
//! One JSON envelope per text frame:
//!
//! ```text
//! {
//!   "action": "SEND_MESSAGE" | "JOIN_ROOM" | "LEAVE_ROOM"
//!           | "USER_JOIN" | "USER_LEFT" | "ROOM_JOINED" | "ERROR",
//!   "message": "...",
//!   "messageType": "normal" | "event",
//!   "target": { "id": 7, "name": "walkies", "roomType": "event" },
//!   "sender": { "id": "<external uid>", "name": "Biscuit" },
//!   "id": 42,                       // persisted messages only
//!   "createdAt": "2024-01-01T..."   // persisted messages only
//! }
//! ```
//!
//! Clients send the first three actions; the rest are server-originated.

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ChatError;
use crate::domain::{ChatMessage, ChatRoom, MessageType, RoomType, User, MAX_MESSAGE_LENGTH};

/// Envelope actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    SendMessage,
    JoinRoom,
    LeaveRoom,
    UserJoin,
    UserLeft,
    RoomJoined,
    Error,
}

/// Room reference carried in `target`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub room_type: RoomType,
}

impl From<&ChatRoom> for RoomRef {
    fn from(room: &ChatRoom) -> Self {
        Self {
            id: room.id,
            name: room.name.clone(),
            room_type: room.room_type,
        }
    }
}

/// Sender reference carried in `sender`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderRef {
    /// External-auth UID
    pub id: String,
    pub name: String,
}

impl From<&User> for SenderRef {
    fn from(user: &User) -> Self {
        Self {
            id: user.uid.clone(),
            name: user.name.clone(),
        }
    }
}

/// The frame exchanged over a chat connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub action: Action,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub message_type: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RoomRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Parse an inbound text frame.
    pub fn decode(text: &str) -> Result<Self, ChatError> {
        serde_json::from_str(text).map_err(|e| ChatError::MalformedFrame(e.to_string()))
    }

    /// Serialize into a text frame.
    pub fn to_frame(&self) -> Utf8Bytes {
        serde_json::to_string(self).unwrap_or_default().into()
    }

    /// A persisted message as seen by room members.
    pub fn from_message(
        action: Action,
        message: &ChatMessage,
        target: RoomRef,
        sender: SenderRef,
    ) -> Self {
        Self {
            action,
            message: message.content.clone(),
            message_type: message.message_type,
            target: Some(target),
            sender: Some(sender),
            id: Some(message.id),
            created_at: Some(message.created_at),
        }
    }

    /// Join confirmation written straight to the joining connection.
    pub fn room_joined(target: RoomRef, sender: SenderRef) -> Self {
        Self {
            action: Action::RoomJoined,
            message: String::new(),
            message_type: MessageType::Event,
            target: Some(target),
            sender: Some(sender),
            id: None,
            created_at: None,
        }
    }

    /// Failure report for a room-scoped action.
    pub fn error(reason: impl Into<String>, target: Option<RoomRef>) -> Self {
        Self {
            action: Action::Error,
            message: reason.into(),
            message_type: MessageType::Event,
            target,
            sender: None,
            id: None,
            created_at: None,
        }
    }

    /// The room the envelope addresses.
    pub fn require_target(&self) -> Result<&RoomRef, ChatError> {
        self.target
            .as_ref()
            .ok_or(ChatError::InvalidEnvelope("missing target room"))
    }

    /// Message content checked for sending.
    pub fn require_content(&self) -> Result<&str, ChatError> {
        let content = self.message.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidEnvelope("empty message"));
        }
        if content.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(ChatError::InvalidEnvelope("message too long"));
        }
        Ok(content)
    }
}
