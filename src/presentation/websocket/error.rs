//! Chat error taxonomy.
//!
//! Transport errors end the connection they happened on. Domain errors and
//! invalid envelopes are reported back to the originating connection and
//! never stop a room's event loop.

use crate::shared::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("{0} deadline exceeded")]
    Timeout(&'static str),

    #[error("room {0} not found")]
    RoomNotFound(i64),

    #[error("client {0} not found")]
    ClientNotFound(String),

    #[error("not a member of room {0}")]
    NotMember(i64),

    #[error("persistence failure: {0}")]
    Persistence(#[from] AppError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("room {0} is not accepting events")]
    RoomUnavailable(i64),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),
}

impl ChatError {
    /// Whether the error must terminate the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChatError::Transport(_)
                | ChatError::MalformedFrame(_)
                | ChatError::Timeout(_)
                | ChatError::ConnectionClosed
        )
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Persistence(e) => e,
            ChatError::RoomNotFound(_) | ChatError::ClientNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            ChatError::NotMember(_) => AppError::Forbidden(err.to_string()),
            ChatError::InvalidEnvelope(_) | ChatError::MalformedFrame(_) => {
                AppError::BadRequest(err.to_string())
            }
            ChatError::Transport(_)
            | ChatError::Timeout(_)
            | ChatError::ConnectionClosed
            | ChatError::RoomUnavailable(_) => AppError::Internal(err.to_string()),
        }
    }
}
