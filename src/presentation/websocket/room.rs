//! Chat Room
//!
//! Each live room owns one task that consumes a single bounded event queue,
//! so register, unregister and broadcast events for a room are processed one
//! at a time and in arrival order. Members are keyed by identity; a
//! reconnect replaces the previous connection of the same user.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

use super::connection::Connection;
use super::error::ChatError;
use super::protocol::{Action, Envelope, RoomRef};
use crate::domain::{ChatMessage, ChatRepository, ChatRoom, MessageType, RoomType};
use crate::infrastructure::metrics;

enum RoomEvent {
    Register {
        client: Arc<Connection>,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Unregister {
        client: Arc<Connection>,
        leave: bool,
        reply: Option<oneshot::Sender<Result<(), ChatError>>>,
    },
    Broadcast {
        sender: Arc<Connection>,
        content: String,
        reply: oneshot::Sender<Result<ChatMessage, ChatError>>,
    },
    Members {
        reply: oneshot::Sender<Vec<Arc<Connection>>>,
    },
}

/// Handle to a live room's event loop.
pub struct Room {
    id: i64,
    name: String,
    room_type: RoomType,
    events: mpsc::Sender<RoomEvent>,
}

impl Room {
    /// Start the event loop for a persisted room.
    pub fn spawn(room: ChatRoom, chat_repo: Arc<dyn ChatRepository>, capacity: usize) -> Arc<Self> {
        let (events, rx) = mpsc::channel(capacity.max(1));
        let target = RoomRef::from(&room);

        let event_loop = RoomLoop {
            target,
            chat_repo,
            members: HashMap::new(),
        };
        tokio::spawn(event_loop.run(rx));

        tracing::debug!(room_id = room.id, name = %room.name, "Room started");

        Arc::new(Self {
            id: room.id,
            name: room.name,
            room_type: room.room_type,
            events,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn room_type(&self) -> RoomType {
        self.room_type
    }

    pub fn room_ref(&self) -> RoomRef {
        RoomRef {
            id: self.id,
            name: self.name.clone(),
            room_type: self.room_type,
        }
    }

    /// Add a connection to the live member set, persisting the membership
    /// and announcing the join if the user was not a member yet.
    pub async fn register(&self, client: Arc<Connection>) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.push(RoomEvent::Register { client, reply }).await?;
        rx.await.map_err(|_| ChatError::RoomUnavailable(self.id))?
    }

    /// Explicit leave: persist it, drop the member, announce it.
    pub async fn leave(&self, client: Arc<Connection>) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.push(RoomEvent::Unregister {
            client,
            leave: true,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| ChatError::RoomUnavailable(self.id))?
    }

    /// Remove a disconnected connection from the live member set only.
    ///
    /// Best effort: waits at most `wait` when the queue is full.
    pub async fn detach(&self, client: Arc<Connection>, wait: Duration) -> bool {
        let event = RoomEvent::Unregister {
            client,
            leave: false,
            reply: None,
        };

        let delivered = match self.events.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => self.events.send_timeout(event, wait).await.is_ok(),
            Err(TrySendError::Closed(_)) => false,
        };

        if !delivered {
            tracing::warn!(room_id = self.id, "Room queue saturated, detach skipped");
        }
        delivered
    }

    /// Persist a user message, then fan it out to every member.
    pub async fn broadcast(
        &self,
        sender: &Arc<Connection>,
        content: String,
    ) -> Result<ChatMessage, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.push(RoomEvent::Broadcast {
            sender: sender.clone(),
            content,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::RoomUnavailable(self.id))?
    }

    /// Current live members.
    pub async fn members(&self) -> Result<Vec<Arc<Connection>>, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.push(RoomEvent::Members { reply }).await?;
        rx.await.map_err(|_| ChatError::RoomUnavailable(self.id))
    }

    async fn push(&self, event: RoomEvent) -> Result<(), ChatError> {
        self.events
            .send(event)
            .await
            .map_err(|_| ChatError::RoomUnavailable(self.id))
    }
}

struct RoomLoop {
    target: RoomRef,
    chat_repo: Arc<dyn ChatRepository>,
    members: HashMap<String, Arc<Connection>>,
}

impl RoomLoop {
    async fn run(mut self, mut events: mpsc::Receiver<RoomEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                RoomEvent::Register { client, reply } => {
                    let result = self.on_register(client).await;
                    let _ = reply.send(result);
                }
                RoomEvent::Unregister {
                    client,
                    leave,
                    reply,
                } => {
                    let result = self.on_unregister(client, leave).await;
                    if let Err(e) = &result {
                        tracing::warn!(room_id = self.target.id, error = %e, "Unregister failed");
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                RoomEvent::Broadcast {
                    sender,
                    content,
                    reply,
                } => {
                    let result = self.on_broadcast(&sender, content).await;
                    let _ = reply.send(result);
                }
                RoomEvent::Members { reply } => {
                    self.prune_closed();
                    let _ = reply.send(self.members.values().cloned().collect());
                }
            }
        }

        tracing::debug!(room_id = self.target.id, "Room stopped");
    }

    async fn on_register(&mut self, client: Arc<Connection>) -> Result<(), ChatError> {
        if client.is_closed() {
            return Err(ChatError::ConnectionClosed);
        }

        let user_id = client.user().id;
        let existing = self
            .chat_repo
            .find_active_membership(self.target.id, user_id)
            .await?;

        if existing.is_none() {
            self.chat_repo.join_room(self.target.id, user_id).await?;
        }

        self.members.insert(client.identity().to_string(), client.clone());

        if existing.is_none() {
            let notice = format!("{} joined the room", client.user().name);
            if let Err(e) = self.publish(&client, Action::UserJoin, MessageType::Event, notice).await {
                tracing::warn!(room_id = self.target.id, error = %e, "Join notice not delivered");
            }
        }

        tracing::debug!(
            room_id = self.target.id,
            user_id,
            members = self.members.len(),
            "Member registered"
        );
        Ok(())
    }

    async fn on_unregister(&mut self, client: Arc<Connection>, leave: bool) -> Result<(), ChatError> {
        // Only the live connection may end a persisted membership
        if leave && client.is_closed() {
            return Err(ChatError::ConnectionClosed);
        }

        if leave {
            self.chat_repo
                .leave_room(self.target.id, client.user().id)
                .await?;
        }

        if self.is_current(&client) {
            self.members.remove(client.identity());
        }

        if leave {
            let notice = format!("{} left the room", client.user().name);
            if let Err(e) = self.publish(&client, Action::UserLeft, MessageType::Event, notice).await {
                tracing::warn!(room_id = self.target.id, error = %e, "Leave notice not delivered");
            }
        }

        tracing::debug!(
            room_id = self.target.id,
            user_id = client.user().id,
            leave,
            members = self.members.len(),
            "Member unregistered"
        );
        Ok(())
    }

    async fn on_broadcast(
        &mut self,
        sender: &Arc<Connection>,
        content: String,
    ) -> Result<ChatMessage, ChatError> {
        if sender.is_closed() {
            return Err(ChatError::ConnectionClosed);
        }
        if !self.is_current(sender) {
            return Err(ChatError::NotMember(self.target.id));
        }
        self.publish(sender, Action::SendMessage, MessageType::Normal, content)
            .await
    }

    /// Persist, then fan out. Nothing is delivered if the write fails.
    async fn publish(
        &mut self,
        sender: &Arc<Connection>,
        action: Action,
        message_type: MessageType,
        content: String,
    ) -> Result<ChatMessage, ChatError> {
        let message = self
            .chat_repo
            .write_message(self.target.id, sender.user().id, message_type, &content)
            .await
            .map_err(|e| {
                metrics::record_persist_failure();
                tracing::warn!(room_id = self.target.id, error = %e, "Message not persisted");
                ChatError::Persistence(e)
            })?;

        let frame =
            Envelope::from_message(action, &message, self.target.clone(), sender.sender_ref())
                .to_frame();

        self.prune_closed();
        for member in self.members.values() {
            member.send(frame.clone());
        }

        metrics::record_chat_message(message_type.as_str());
        Ok(message)
    }

    fn is_current(&self, client: &Arc<Connection>) -> bool {
        self.members
            .get(client.identity())
            .is_some_and(|member| Arc::ptr_eq(member, client))
    }

    fn prune_closed(&mut self) {
        self.members.retain(|_, member| !member.is_closed());
    }
}
