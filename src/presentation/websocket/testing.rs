//! Helpers shared by the chat core unit tests.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;

use super::connection::Connection;
use super::protocol::Envelope;
use super::state::StateManager;
use crate::config::WebSocketSettings;
use crate::domain::User;
use crate::infrastructure::repositories::InMemoryChatRepository;

pub fn settings() -> WebSocketSettings {
    WebSocketSettings::default()
}

pub fn user(id: i64) -> User {
    User::new(id, format!("uid-{id}"), format!("pup-{id}"))
}

/// Next frame on a connection's outbound queue, decoded.
pub async fn next_envelope(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Envelope {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("outbound queue closed");
    Envelope::decode(frame.as_str()).expect("undecodable frame")
}

/// Every frame already queued, decoded.
pub fn drain(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Vec<Envelope> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(Envelope::decode(frame.as_str()).expect("undecodable frame"));
    }
    frames
}

/// A state manager over in-memory persistence.
pub struct TestChat {
    pub repo: Arc<InMemoryChatRepository>,
    pub state: Arc<StateManager>,
}

impl TestChat {
    pub fn new() -> Self {
        Self::with_room_capacity(64)
    }

    pub fn with_room_capacity(capacity: usize) -> Self {
        let repo = Arc::new(InMemoryChatRepository::new());
        let state = Arc::new(StateManager::new(repo.clone(), capacity));
        Self { repo, state }
    }

    /// Create a connection and register it with the state manager.
    pub fn connect(&self, user: User) -> (Arc<Connection>, mpsc::Receiver<Utf8Bytes>) {
        let (conn, rx) = Connection::new(user, &settings());
        self.state.register_client(conn.clone());
        (conn, rx)
    }
}
