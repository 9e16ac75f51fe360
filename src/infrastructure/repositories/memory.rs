//! In-memory repository implementations.
//!
//! Behave like the PostgreSQL repositories (store-assigned IDs, soft-deleted
//! memberships, newest-first history) without a database. Used by tests and
//! local tooling. Message writes can be made to fail for fault injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::{
    ChatMessage, ChatRepository, ChatRoom, MessagePage, MessageType, RoomMember, RoomType, User,
    UserChatRoom, UserRepository,
};
use crate::shared::error::AppError;

#[derive(Debug, Clone)]
struct MembershipRecord {
    member: RoomMember,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ChatTables {
    next_id: i64,
    rooms: HashMap<i64, ChatRoom>,
    memberships: Vec<MembershipRecord>,
    messages: Vec<ChatMessage>,
}

impl ChatTables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn active(&self, room_id: i64, user_id: i64) -> Option<&MembershipRecord> {
        self.memberships.iter().find(|m| {
            m.member.room_id == room_id && m.member.user_id == user_id && m.deleted_at.is_none()
        })
    }
}

/// In-memory chat persistence.
#[derive(Default)]
pub struct InMemoryChatRepository {
    tables: Mutex<ChatTables>,
    users: InMemoryUserRepository,
    fail_writes: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    write_delay: Mutex<Option<Duration>>,
    create_calls: AtomicUsize,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a user table so reconciliation can resolve user records.
    pub fn with_users(users: InMemoryUserRepository) -> Self {
        Self {
            users,
            ..Self::default()
        }
    }

    /// Make every subsequent `write_message` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay inside `create_room`, widening race windows in tests.
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        *self.create_delay.lock() = delay;
    }

    /// Delay inside `write_message`, stalling a room's event loop in tests.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    /// Number of rooms created through `create_room`.
    pub fn create_room_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Insert a room directly, bypassing `create_room` accounting.
    pub fn seed_room(&self, name: &str, room_type: RoomType) -> ChatRoom {
        let mut tables = self.tables.lock();
        let id = tables.allocate_id();
        let now = Utc::now();
        let room = ChatRoom {
            id,
            name: name.to_string(),
            room_type,
            created_at: now,
            updated_at: now,
        };
        tables.rooms.insert(id, room.clone());
        room
    }

    /// Room IDs the user holds an active membership in.
    pub fn active_room_ids(&self, user_id: i64) -> Vec<i64> {
        let tables = self.tables.lock();
        let mut ids: Vec<i64> = tables
            .memberships
            .iter()
            .filter(|m| m.member.user_id == user_id && m.deleted_at.is_none())
            .map(|m| m.member.room_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Every stored message of a room, oldest first.
    pub fn messages_in(&self, room_id: i64) -> Vec<ChatMessage> {
        self.tables
            .lock()
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChatRepository for InMemoryChatRepository {
    async fn create_room(&self, name: &str, room_type: RoomType) -> Result<ChatRoom, AppError> {
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.seed_room(name, room_type))
    }

    async fn find_room_by_id(&self, room_id: i64) -> Result<Option<ChatRoom>, AppError> {
        Ok(self.tables.lock().rooms.get(&room_id).cloned())
    }

    async fn join_room(&self, room_id: i64, user_id: i64) -> Result<RoomMember, AppError> {
        let mut tables = self.tables.lock();
        if !tables.rooms.contains_key(&room_id) {
            return Err(AppError::NotFound(format!("Room {} not found", room_id)));
        }
        if let Some(existing) = tables.active(room_id, user_id) {
            return Ok(existing.member.clone());
        }
        let member = RoomMember {
            id: tables.allocate_id(),
            user_id,
            room_id,
            created_at: Utc::now(),
        };
        tables.memberships.push(MembershipRecord {
            member: member.clone(),
            deleted_at: None,
        });
        Ok(member)
    }

    async fn leave_room(&self, room_id: i64, user_id: i64) -> Result<(), AppError> {
        let mut tables = self.tables.lock();
        let now = Utc::now();
        for record in tables.memberships.iter_mut().filter(|m| {
            m.member.room_id == room_id && m.member.user_id == user_id && m.deleted_at.is_none()
        }) {
            record.deleted_at = Some(now);
        }
        Ok(())
    }

    async fn find_active_membership(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> Result<Option<RoomMember>, AppError> {
        Ok(self
            .tables
            .lock()
            .active(room_id, user_id)
            .map(|m| m.member.clone()))
    }

    async fn write_message(
        &self,
        room_id: i64,
        user_id: i64,
        message_type: MessageType,
        content: &str,
    ) -> Result<ChatMessage, AppError> {
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Internal("message store unavailable".into()));
        }
        let mut tables = self.tables.lock();
        if !tables.rooms.contains_key(&room_id) {
            return Err(AppError::NotFound(format!("Room {} not found", room_id)));
        }
        let message = ChatMessage {
            id: tables.allocate_id(),
            room_id,
            user_id,
            message_type,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn find_user_chat_rooms(&self) -> Result<Vec<UserChatRoom>, AppError> {
        let pairs: Vec<(i64, ChatRoom)> = {
            let tables = self.tables.lock();
            tables
                .memberships
                .iter()
                .filter(|m| m.deleted_at.is_none())
                .filter_map(|m| {
                    tables
                        .rooms
                        .get(&m.member.room_id)
                        .map(|room| (m.member.user_id, room.clone()))
                })
                .collect()
        };

        let mut result = Vec::with_capacity(pairs.len());
        for (user_id, room) in pairs {
            if let Some(user) = self.users.find_by_id(user_id).await? {
                result.push(UserChatRoom { user, room });
            }
        }
        Ok(result)
    }

    async fn find_chat_rooms_by_user(&self, user_id: i64) -> Result<Vec<ChatRoom>, AppError> {
        let tables = self.tables.lock();
        let mut rooms: Vec<ChatRoom> = tables
            .memberships
            .iter()
            .filter(|m| m.member.user_id == user_id && m.deleted_at.is_none())
            .filter_map(|m| tables.rooms.get(&m.member.room_id).cloned())
            .collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn find_messages_by_room(
        &self,
        room_id: i64,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<MessagePage, AppError> {
        let tables = self.tables.lock();
        let mut messages: Vec<ChatMessage> = tables
            .messages
            .iter()
            .filter(|m| m.room_id == room_id && cursor.map_or(true, |c| m.id < c))
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.id.cmp(&a.id));
        messages.truncate(limit.max(0) as usize);
        Ok(MessagePage::from_messages(messages, limit))
    }
}

/// In-memory user table.
#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    users: std::sync::Arc<Mutex<HashMap<i64, User>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub fn insert(&self, user: User) {
        self.users.lock().insert(user.id, user);
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        Ok(self.users.lock().get(&id).cloned())
    }

    async fn find_by_uid(&self, uid: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.lock().values().find(|u| u.uid == uid).cloned())
    }
}
