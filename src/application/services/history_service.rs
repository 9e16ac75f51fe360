//! Chat History Service
//!
//! Read side of the chat persistence port for the REST surface: paginated
//! room history and the rooms a user belongs to.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{clamp_page_limit, ChatRepository, ChatRoom, MessagePage, User};
use crate::shared::error::AppError;

/// History service trait
#[async_trait]
pub trait HistoryService: Send + Sync {
    /// Page through a room's messages, newest first. Members only.
    async fn room_history(
        &self,
        user: &User,
        room_id: i64,
        cursor: Option<i64>,
        limit: Option<i64>,
    ) -> Result<MessagePage, AppError>;

    /// Rooms the user holds an active membership in.
    async fn user_rooms(&self, user: &User) -> Result<Vec<ChatRoom>, AppError>;
}

/// HistoryService implementation over any chat repository
pub struct ChatHistoryService {
    chat_repo: Arc<dyn ChatRepository>,
}

impl ChatHistoryService {
    pub fn new(chat_repo: Arc<dyn ChatRepository>) -> Self {
        Self { chat_repo }
    }
}

#[async_trait]
impl HistoryService for ChatHistoryService {
    async fn room_history(
        &self,
        user: &User,
        room_id: i64,
        cursor: Option<i64>,
        limit: Option<i64>,
    ) -> Result<MessagePage, AppError> {
        self.chat_repo
            .find_room_by_id(room_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {} not found", room_id)))?;

        if self
            .chat_repo
            .find_active_membership(room_id, user.id)
            .await?
            .is_none()
        {
            return Err(AppError::Forbidden("Not a member of this room".into()));
        }

        self.chat_repo
            .find_messages_by_room(room_id, cursor, clamp_page_limit(limit))
            .await
    }

    async fn user_rooms(&self, user: &User) -> Result<Vec<ChatRoom>, AppError> {
        self.chat_repo.find_chat_rooms_by_user(user.id).await
    }
}
