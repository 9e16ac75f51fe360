//! Chat Repository Implementation
//!
//! PostgreSQL implementation of the chat persistence port: rooms,
//! soft-deleted memberships, and messages with cursor pagination.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{
    ChatMessage, ChatRepository, ChatRoom, MessagePage, MessageType, RoomMember, RoomType, User,
    UserChatRoom,
};
use crate::shared::error::AppError;

/// PostgreSQL chat repository implementation.
#[derive(Clone)]
pub struct PgChatRepository {
    pool: PgPool,
}

impl PgChatRepository {
    /// Creates a new PgChatRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoomRow {
    id: i64,
    name: String,
    room_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RoomRow {
    fn into_room(self) -> ChatRoom {
        ChatRoom {
            id: self.id,
            name: self.name,
            room_type: RoomType::from_str(&self.room_type),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    id: i64,
    user_id: i64,
    room_id: i64,
    created_at: DateTime<Utc>,
}

impl MemberRow {
    fn into_member(self) -> RoomMember {
        RoomMember {
            id: self.id,
            user_id: self.user_id,
            room_id: self.room_id,
            created_at: self.created_at,
        }
    }
}

/// Maps to the chat_messages table.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    room_id: i64,
    user_id: i64,
    message_type: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            room_id: self.room_id,
            user_id: self.user_id,
            message_type: MessageType::from_str(&self.message_type),
            content: self.content,
            created_at: self.created_at,
        }
    }
}

/// Joined membership row for startup reconciliation.
#[derive(Debug, sqlx::FromRow)]
struct UserChatRoomRow {
    user_id: i64,
    user_uid: String,
    user_name: String,
    user_created_at: DateTime<Utc>,
    user_updated_at: DateTime<Utc>,
    room_id: i64,
    room_name: String,
    room_type: String,
    room_created_at: DateTime<Utc>,
    room_updated_at: DateTime<Utc>,
}

impl UserChatRoomRow {
    fn into_user_chat_room(self) -> UserChatRoom {
        UserChatRoom {
            user: User {
                id: self.user_id,
                uid: self.user_uid,
                name: self.user_name,
                created_at: self.user_created_at,
                updated_at: self.user_updated_at,
            },
            room: ChatRoom {
                id: self.room_id,
                name: self.room_name,
                room_type: RoomType::from_str(&self.room_type),
                created_at: self.room_created_at,
                updated_at: self.room_updated_at,
            },
        }
    }
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn create_room(&self, name: &str, room_type: RoomType) -> Result<ChatRoom, AppError> {
        let row = sqlx::query_as::<_, RoomRow>(
            r#"
            INSERT INTO chat_rooms (name, room_type)
            VALUES ($1, $2)
            RETURNING id, name, room_type, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(room_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_room())
    }

    async fn find_room_by_id(&self, room_id: i64) -> Result<Option<ChatRoom>, AppError> {
        let row = sqlx::query_as::<_, RoomRow>(
            r#"
            SELECT id, name, room_type, created_at, updated_at
            FROM chat_rooms
            WHERE id = $1
            "#,
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RoomRow::into_room))
    }

    async fn join_room(&self, room_id: i64, user_id: i64) -> Result<RoomMember, AppError> {
        let inserted = sqlx::query_as::<_, MemberRow>(
            r#"
            INSERT INTO chat_room_members (room_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (room_id, user_id) WHERE deleted_at IS NULL DO NOTHING
            RETURNING id, user_id, room_id, created_at
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok(row.into_member()),
            None => self
                .find_active_membership(room_id, user_id)
                .await?
                .ok_or_else(|| {
                    AppError::Conflict(format!(
                        "Membership for user {} in room {} changed concurrently",
                        user_id, room_id
                    ))
                }),
        }
    }

    async fn leave_room(&self, room_id: i64, user_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE chat_room_members
            SET deleted_at = NOW()
            WHERE room_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_active_membership(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> Result<Option<RoomMember>, AppError> {
        let row = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT id, user_id, room_id, created_at
            FROM chat_room_members
            WHERE room_id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MemberRow::into_member))
    }

    async fn write_message(
        &self,
        room_id: i64,
        user_id: i64,
        message_type: MessageType,
        content: &str,
    ) -> Result<ChatMessage, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO chat_messages (room_id, user_id, message_type, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id, room_id, user_id, message_type, content, created_at
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(message_type.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_message())
    }

    async fn find_user_chat_rooms(&self) -> Result<Vec<UserChatRoom>, AppError> {
        let rows = sqlx::query_as::<_, UserChatRoomRow>(
            r#"
            SELECT u.id AS user_id, u.uid AS user_uid, u.name AS user_name,
                   u.created_at AS user_created_at, u.updated_at AS user_updated_at,
                   r.id AS room_id, r.name AS room_name, r.room_type,
                   r.created_at AS room_created_at, r.updated_at AS room_updated_at
            FROM chat_room_members m
            JOIN users u ON u.id = m.user_id
            JOIN chat_rooms r ON r.id = m.room_id
            WHERE m.deleted_at IS NULL
            ORDER BY r.id, u.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(UserChatRoomRow::into_user_chat_room)
            .collect())
    }

    async fn find_chat_rooms_by_user(&self, user_id: i64) -> Result<Vec<ChatRoom>, AppError> {
        let rows = sqlx::query_as::<_, RoomRow>(
            r#"
            SELECT r.id, r.name, r.room_type, r.created_at, r.updated_at
            FROM chat_rooms r
            JOIN chat_room_members m ON m.room_id = r.id
            WHERE m.user_id = $1 AND m.deleted_at IS NULL
            ORDER BY r.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RoomRow::into_room).collect())
    }

    async fn find_messages_by_room(
        &self,
        room_id: i64,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<MessagePage, AppError> {
        let rows = if let Some(before_id) = cursor {
            sqlx::query_as::<_, MessageRow>(
                r#"
                SELECT id, room_id, user_id, message_type, content, created_at
                FROM chat_messages
                WHERE room_id = $1 AND id < $2
                ORDER BY id DESC
                LIMIT $3
                "#,
            )
            .bind(room_id)
            .bind(before_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, MessageRow>(
                r#"
                SELECT id, room_id, user_id, message_type, content, created_at
                FROM chat_messages
                WHERE room_id = $1
                ORDER BY id DESC
                LIMIT $2
                "#,
            )
            .bind(room_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        let messages = rows.into_iter().map(MessageRow::into_message).collect();
        Ok(MessagePage::from_messages(messages, limit))
    }
}
