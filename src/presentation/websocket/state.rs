//! Chat State Manager
//!
//! Process-wide index of online clients (by identity) and live rooms (by
//! room ID). Both maps sit behind one read/write lock that is never held
//! across an await. Room creation is serialized by a separate async lock so
//! that at most one live room exists per room ID.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::connection::Connection;
use super::error::ChatError;
use super::protocol::RoomRef;
use super::room::Room;
use crate::domain::{ChatRepository, ChatRoom, RoomType, MAX_ROOM_NAME_LENGTH};
use crate::infrastructure::metrics;

#[derive(Default)]
struct Registry {
    clients: HashMap<String, Arc<Connection>>,
    rooms: HashMap<i64, Arc<Room>>,
}

/// Authoritative registry of connections and rooms.
pub struct StateManager {
    registry: RwLock<Registry>,
    create_lock: Mutex<()>,
    chat_repo: Arc<dyn ChatRepository>,
    room_queue_capacity: usize,
}

impl StateManager {
    pub fn new(chat_repo: Arc<dyn ChatRepository>, room_queue_capacity: usize) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            create_lock: Mutex::new(()),
            chat_repo,
            room_queue_capacity,
        }
    }

    /// Map the connection's identity to it, replacing any previous
    /// connection of the same identity. Returns the replaced connection.
    pub fn register_client(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let mut registry = self.registry.write();
        let previous = registry
            .clients
            .insert(conn.identity().to_string(), conn.clone());
        metrics::set_websocket_connections(registry.clients.len());

        tracing::info!(
            connection_id = %conn.id(),
            user_id = conn.user().id,
            replaced = previous.is_some(),
            "Client registered"
        );
        previous
    }

    /// Remove the identity mapping if it still points at this connection.
    pub fn unregister_client(&self, conn: &Arc<Connection>) -> bool {
        let mut registry = self.registry.write();
        let is_current = registry
            .clients
            .get(conn.identity())
            .is_some_and(|current| Arc::ptr_eq(current, conn));

        if is_current {
            registry.clients.remove(conn.identity());
            metrics::set_websocket_connections(registry.clients.len());
        }
        is_current
    }

    pub fn find_client_by_identity(&self, identity: &str) -> Result<Arc<Connection>, ChatError> {
        self.registry
            .read()
            .clients
            .get(identity)
            .cloned()
            .ok_or_else(|| ChatError::ClientNotFound(identity.to_string()))
    }

    pub fn find_room_by_id(&self, room_id: i64) -> Option<Arc<Room>> {
        self.registry.read().rooms.get(&room_id).cloned()
    }

    /// Create a room through the persistence port and start it.
    pub async fn create_room(&self, name: &str, room_type: RoomType) -> Result<Arc<Room>, ChatError> {
        let _guard = self.create_lock.lock().await;
        self.create_locked(name, room_type).await
    }

    /// Resolve a join target to a live room, creating it at most once.
    ///
    /// Lookup order: live room by ID, persisted room by ID, live room with
    /// the same name and type, then a new room.
    pub async fn find_or_create_room(&self, target: &RoomRef) -> Result<Arc<Room>, ChatError> {
        if let Some(room) = self.find_room_by_id(target.id) {
            return Ok(room);
        }

        let _guard = self.create_lock.lock().await;

        if let Some(room) = self.find_room_by_id(target.id) {
            return Ok(room);
        }

        if target.id > 0 {
            if let Some(persisted) = self.chat_repo.find_room_by_id(target.id).await? {
                return Ok(self.restore_room(persisted));
            }
        }

        if let Some(room) = self.find_room_by_name(&target.name, target.room_type) {
            return Ok(room);
        }

        let name = target.name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidEnvelope("room name required to create a room"));
        }
        if name.chars().count() > MAX_ROOM_NAME_LENGTH {
            return Err(ChatError::InvalidEnvelope("room name too long"));
        }
        self.create_locked(name, target.room_type).await
    }

    /// Install a live room for an already persisted room. Idempotent.
    pub fn restore_room(&self, room: ChatRoom) -> Arc<Room> {
        let mut registry = self.registry.write();
        if let Some(existing) = registry.rooms.get(&room.id) {
            return existing.clone();
        }

        let live = Room::spawn(room, self.chat_repo.clone(), self.room_queue_capacity);
        registry.rooms.insert(live.id(), live.clone());
        metrics::set_live_rooms(registry.rooms.len());
        live
    }

    /// Register a connection onto a live room.
    pub async fn join_room(&self, room_id: i64, conn: &Arc<Connection>) -> Result<(), ChatError> {
        self.live_room(room_id)?.register(conn.clone()).await
    }

    /// Explicitly leave a live room.
    pub async fn leave_room(&self, room_id: i64, conn: &Arc<Connection>) -> Result<(), ChatError> {
        self.live_room(room_id)?.leave(conn.clone()).await
    }

    pub async fn is_client_in_room(&self, room_id: i64, identity: &str) -> Result<bool, ChatError> {
        Ok(self
            .get_room_members(room_id)
            .await?
            .iter()
            .any(|member| member.identity() == identity))
    }

    /// Rooms the registered connection for `identity` has joined.
    pub fn get_client_rooms(&self, identity: &str) -> Result<Vec<i64>, ChatError> {
        Ok(self.find_client_by_identity(identity)?.joined_rooms())
    }

    pub async fn get_room_members(&self, room_id: i64) -> Result<Vec<Arc<Connection>>, ChatError> {
        self.live_room(room_id)?.members().await
    }

    /// Best-effort delivery to every registered connection. Returns how many
    /// accepted the frame.
    pub fn broadcast_to_all_clients(&self, frame: Utf8Bytes) -> usize {
        let clients: Vec<Arc<Connection>> = self.registry.read().clients.values().cloned().collect();
        clients
            .iter()
            .filter(|client| client.send(frame.clone()))
            .count()
    }

    /// Close every registered connection; their loops run cleanup.
    pub fn close_all_clients(&self) {
        let clients: Vec<Arc<Connection>> = self.registry.read().clients.values().cloned().collect();
        for client in clients {
            client.close();
        }
    }

    pub fn client_count(&self) -> usize {
        self.registry.read().clients.len()
    }

    pub fn room_count(&self) -> usize {
        self.registry.read().rooms.len()
    }

    fn live_room(&self, room_id: i64) -> Result<Arc<Room>, ChatError> {
        self.find_room_by_id(room_id)
            .ok_or(ChatError::RoomNotFound(room_id))
    }

    fn find_room_by_name(&self, name: &str, room_type: RoomType) -> Option<Arc<Room>> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        self.registry
            .read()
            .rooms
            .values()
            .filter(|room| room.name() == name && room.room_type() == room_type)
            .min_by_key(|room| room.id())
            .cloned()
    }

    /// Caller holds `create_lock`.
    async fn create_locked(&self, name: &str, room_type: RoomType) -> Result<Arc<Room>, ChatError> {
        let persisted = self.chat_repo.create_room(name, room_type).await?;
        tracing::info!(room_id = persisted.id, name = %persisted.name, "Room created");
        Ok(self.restore_room(persisted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::User;
    use crate::presentation::websocket::protocol::Action;
    use crate::presentation::websocket::testing::{drain, next_envelope, user, TestChat};
    use crate::shared::error::AppError;
    use pretty_assertions::assert_eq;

    fn target(id: i64, name: &str) -> RoomRef {
        RoomRef {
            id,
            name: name.into(),
            room_type: RoomType::Event,
        }
    }

    #[tokio::test]
    async fn test_reconnect_replaces_mapping() {
        let chat = TestChat::new();
        let (first, _rx1) = chat.connect(user(1));
        let (second, _rx2) = chat.connect(user(1));

        let current = chat.state.find_client_by_identity("uid-1").unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert!(!Arc::ptr_eq(&current, &first));
        assert_eq!(chat.state.client_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_unregister_is_ignored() {
        let chat = TestChat::new();
        let (first, _rx1) = chat.connect(user(1));
        let (second, _rx2) = chat.connect(user(1));

        assert!(!chat.state.unregister_client(&first));
        assert!(chat.state.find_client_by_identity("uid-1").is_ok());

        assert!(chat.state.unregister_client(&second));
        assert!(matches!(
            chat.state.find_client_by_identity("uid-1"),
            Err(ChatError::ClientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_room_by_id_is_none_for_unknown() {
        let chat = TestChat::new();
        assert!(chat.state.find_room_by_id(77).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_find_or_create_yields_one_room() {
        let chat = TestChat::new();
        chat.repo.set_create_delay(Some(Duration::from_millis(20)));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let state = chat.state.clone();
                tokio::spawn(async move { state.find_or_create_room(&target(0, "walkies")).await })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().id());
        }
        ids.dedup();

        assert_eq!(ids.len(), 1);
        assert_eq!(chat.repo.create_room_calls(), 1);
        assert_eq!(chat.state.room_count(), 1);
    }

    #[tokio::test]
    async fn test_find_or_create_restores_persisted_room() {
        let chat = TestChat::new();
        let persisted = chat.repo.seed_room("park", RoomType::Group);

        let room = chat
            .state
            .find_or_create_room(&target(persisted.id, ""))
            .await
            .unwrap();

        assert_eq!(room.id(), persisted.id);
        assert_eq!(room.name(), "park");
        assert_eq!(chat.repo.create_room_calls(), 0);
    }

    #[tokio::test]
    async fn test_find_or_create_without_name_is_rejected() {
        let chat = TestChat::new();

        let result = chat.state.find_or_create_room(&target(404, " ")).await;

        assert!(matches!(result, Err(ChatError::InvalidEnvelope(_))));
        assert_eq!(chat.state.room_count(), 0);
    }

    #[tokio::test]
    async fn test_find_or_create_rejects_overlong_name() {
        let chat = TestChat::new();
        let too_long = "w".repeat(MAX_ROOM_NAME_LENGTH + 1);

        let result = chat.state.find_or_create_room(&target(0, &too_long)).await;

        assert!(matches!(result, Err(ChatError::InvalidEnvelope(_))));
        assert_eq!(chat.repo.create_room_calls(), 0);

        let longest = "w".repeat(MAX_ROOM_NAME_LENGTH);
        let room = chat
            .state
            .find_or_create_room(&target(0, &longest))
            .await
            .unwrap();
        assert_eq!(room.name(), longest);
    }

    #[tokio::test]
    async fn test_restore_room_is_idempotent() {
        let chat = TestChat::new();
        let persisted = chat.repo.seed_room("park", RoomType::Group);

        let first = chat.state.restore_room(persisted.clone());
        let second = chat.state.restore_room(persisted);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(chat.state.room_count(), 1);
    }

    #[tokio::test]
    async fn test_create_room_failure_leaves_index_unchanged() {
        struct BrokenRepo;

        #[async_trait::async_trait]
        impl ChatRepository for BrokenRepo {
            async fn create_room(&self, _: &str, _: RoomType) -> Result<ChatRoom, AppError> {
                Err(AppError::Internal("db down".into()))
            }
            async fn find_room_by_id(&self, _: i64) -> Result<Option<ChatRoom>, AppError> {
                Ok(None)
            }
            async fn join_room(&self, _: i64, _: i64) -> Result<crate::domain::RoomMember, AppError> {
                Err(AppError::Internal("db down".into()))
            }
            async fn leave_room(&self, _: i64, _: i64) -> Result<(), AppError> {
                Ok(())
            }
            async fn find_active_membership(
                &self,
                _: i64,
                _: i64,
            ) -> Result<Option<crate::domain::RoomMember>, AppError> {
                Ok(None)
            }
            async fn write_message(
                &self,
                _: i64,
                _: i64,
                _: crate::domain::MessageType,
                _: &str,
            ) -> Result<crate::domain::ChatMessage, AppError> {
                Err(AppError::Internal("db down".into()))
            }
            async fn find_user_chat_rooms(&self) -> Result<Vec<crate::domain::UserChatRoom>, AppError> {
                Ok(vec![])
            }
            async fn find_chat_rooms_by_user(&self, _: i64) -> Result<Vec<ChatRoom>, AppError> {
                Ok(vec![])
            }
            async fn find_messages_by_room(
                &self,
                _: i64,
                _: Option<i64>,
                _: i64,
            ) -> Result<crate::domain::MessagePage, AppError> {
                Ok(Default::default())
            }
        }

        let state = StateManager::new(Arc::new(BrokenRepo), 8);
        let result = state.create_room("walkies", RoomType::Event).await;

        assert!(matches!(result, Err(ChatError::Persistence(_))));
        assert_eq!(state.room_count(), 0);
    }

    #[tokio::test]
    async fn test_join_scenario_two_clients() {
        let chat = TestChat::new();
        let (a, mut a_rx) = chat.connect(user(1));
        let (b, mut b_rx) = chat.connect(User::new(2, "uid-2", "Mochi"));
        let join = r#"{"action":"JOIN_ROOM","target":{"id":0,"name":"walkies","roomType":"event"}}"#;

        a.handle_text(join, &chat.state).await.unwrap();
        let room_id = a.joined_rooms()[0];
        assert_eq!(chat.state.get_room_members(room_id).await.unwrap().len(), 1);
        drain(&mut a_rx);

        b.handle_text(join, &chat.state).await.unwrap();
        assert_eq!(b.joined_rooms(), vec![room_id]);

        let notice = next_envelope(&mut a_rx).await;
        assert_eq!(notice.action, Action::UserJoin);
        assert_eq!(notice.sender.unwrap().name, "Mochi");
        drain(&mut b_rx);

        let send = format!(r#"{{"action":"SEND_MESSAGE","message":"hi","target":{{"id":{room_id}}}}}"#);
        b.handle_text(&send, &chat.state).await.unwrap();

        let at_a = next_envelope(&mut a_rx).await;
        let at_b = next_envelope(&mut b_rx).await;
        assert_eq!(at_a.message, "hi");
        assert_eq!(at_a, at_b);
        assert_eq!(at_a.target.unwrap().id, room_id);

        let history = chat.repo.messages_in(room_id);
        assert_eq!(history.last().unwrap().content, "hi");
    }

    #[tokio::test]
    async fn test_unclean_disconnect_leaves_every_room() {
        let chat = TestChat::new();
        let (a, _a_rx) = chat.connect(user(1));
        let (b, _b_rx) = chat.connect(user(2));
        let room3 = chat.repo.seed_room("three", RoomType::Group);
        let room9 = chat.repo.seed_room("nine", RoomType::Group);

        for room in [&room3, &room9] {
            let join = format!(r#"{{"action":"JOIN_ROOM","target":{{"id":{}}}}}"#, room.id);
            a.handle_text(&join, &chat.state).await.unwrap();
            b.handle_text(&join, &chat.state).await.unwrap();
        }

        let stream = futures::stream::iter(vec![Err::<axum::extract::ws::Message, _>(
            axum::Error::new(std::io::Error::other("connection reset")),
        )]);
        let result = a.read_loop(stream, &chat.state, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ChatError::Transport(_))));
        a.disconnect(&chat.state, Duration::from_millis(100)).await;

        for room in [&room3, &room9] {
            assert!(!chat.state.is_client_in_room(room.id, "uid-1").await.unwrap());
            assert!(chat.state.is_client_in_room(room.id, "uid-2").await.unwrap());
        }
        assert!(chat.state.find_client_by_identity("uid-1").is_err());
    }

    #[tokio::test]
    async fn test_get_client_rooms_and_global_broadcast() {
        let chat = TestChat::new();
        let (a, mut a_rx) = chat.connect(user(1));
        let (_b, mut b_rx) = chat.connect(user(2));
        let room = chat.repo.seed_room("park", RoomType::Group);
        let join = format!(r#"{{"action":"JOIN_ROOM","target":{{"id":{}}}}}"#, room.id);
        a.handle_text(&join, &chat.state).await.unwrap();
        drain(&mut a_rx);

        assert_eq!(chat.state.get_client_rooms("uid-1").unwrap(), vec![room.id]);
        assert!(chat.state.get_client_rooms("uid-404").is_err());

        assert_eq!(chat.state.broadcast_to_all_clients("notice".into()), 2);
        assert_eq!(a_rx.recv().await.unwrap().as_str(), "notice");
        assert_eq!(b_rx.recv().await.unwrap().as_str(), "notice");
    }

    #[tokio::test]
    async fn test_room_operations_on_unknown_room() {
        let chat = TestChat::new();
        let (a, _rx) = chat.connect(user(1));

        assert!(matches!(
            chat.state.join_room(5, &a).await,
            Err(ChatError::RoomNotFound(5))
        ));
        assert!(matches!(
            chat.state.get_room_members(5).await,
            Err(ChatError::RoomNotFound(5))
        ));
    }
}
