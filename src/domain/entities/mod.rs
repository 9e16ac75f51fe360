//! # Domain Entities
//!
//! Records exchanged with the persistence layer. They map directly to their
//! database tables.
//!
//! - **User**: an identity resolved from the external auth provider
//! - **ChatRoom**: a room and its type
//! - **RoomMember**: an active (non-left) membership row
//! - **ChatMessage**: a persisted message in a room
//!
//! ## Repository Traits
//!
//! `UserRepository` and `ChatRepository` define data access. They are
//! implemented in the infrastructure layer.

mod message;
mod room;
mod user;

pub use message::{
    clamp_page_limit, ChatMessage, MessagePage, MessageType, DEFAULT_PAGE_LIMIT,
    MAX_MESSAGE_LENGTH, MAX_PAGE_LIMIT,
};
pub use room::{
    ChatRepository, ChatRoom, RoomMember, RoomType, UserChatRoom, MAX_ROOM_NAME_LENGTH,
};
pub use user::{User, UserRepository};

#[cfg(test)]
pub use user::MockUserRepository;
