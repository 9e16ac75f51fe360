//! Chat Connection
//!
//! One `Connection` per socket. A read loop decodes envelopes and dispatches
//! them; a write loop drains the bounded outbound queue and keeps the peer
//! alive with pings. Rooms and the state manager only ever hold
//! `Arc<Connection>` and push frames through [`Connection::send`].

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use uuid::Uuid;

use super::error::ChatError;
use super::protocol::{Action, Envelope, RoomRef, SenderRef};
use super::state::StateManager;
use crate::config::WebSocketSettings;
use crate::domain::User;
use crate::infrastructure::metrics;

/// A live client connection.
pub struct Connection {
    id: Uuid,
    user: User,
    outbound: mpsc::Sender<Utf8Bytes>,
    joined_rooms: Mutex<HashSet<i64>>,
    consecutive_drops: AtomicU32,
    max_consecutive_drops: u32,
    closed: watch::Sender<bool>,
    cleaned_up: AtomicBool,
}

impl Connection {
    /// Create a connection and the receiving end of its outbound queue.
    pub fn new(user: User, settings: &WebSocketSettings) -> (Arc<Self>, mpsc::Receiver<Utf8Bytes>) {
        let (outbound, outbound_rx) = mpsc::channel(settings.outbound_queue_capacity.max(1));
        let (closed, _) = watch::channel(false);

        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            user,
            outbound,
            joined_rooms: Mutex::new(HashSet::new()),
            consecutive_drops: AtomicU32::new(0),
            max_consecutive_drops: settings.max_consecutive_drops.max(1),
            closed,
            cleaned_up: AtomicBool::new(false),
        });

        (connection, outbound_rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    /// External-auth UID, the key used by the state manager and rooms.
    pub fn identity(&self) -> &str {
        &self.user.uid
    }

    pub fn sender_ref(&self) -> SenderRef {
        SenderRef::from(&self.user)
    }

    /// Enqueue a frame without waiting.
    ///
    /// A full queue drops the frame. After `max_consecutive_drops` drops in a
    /// row the connection is closed; any successful enqueue resets the count.
    pub fn send(&self, frame: Utf8Bytes) -> bool {
        if self.is_closed() {
            return false;
        }

        match self.outbound.try_send(frame) {
            Ok(()) => {
                self.consecutive_drops.store(0, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                metrics::record_outbound_drop();
                let drops = self.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    connection_id = %self.id,
                    user_id = self.user.id,
                    drops,
                    "Outbound queue full, frame dropped"
                );
                if drops >= self.max_consecutive_drops {
                    tracing::warn!(
                        connection_id = %self.id,
                        user_id = self.user.id,
                        "Closing slow connection"
                    );
                    self.close();
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                false
            }
        }
    }

    /// Signal both loops to stop.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn is_joined(&self, room_id: i64) -> bool {
        self.joined_rooms.lock().contains(&room_id)
    }

    /// Mark a room as joined. Returns false if it already was.
    pub fn mark_joined(&self, room_id: i64) -> bool {
        self.joined_rooms.lock().insert(room_id)
    }

    /// Mark a room as left. Returns false if it was not joined.
    pub fn mark_left(&self, room_id: i64) -> bool {
        self.joined_rooms.lock().remove(&room_id)
    }

    /// Joined room IDs, sorted.
    pub fn joined_rooms(&self) -> Vec<i64> {
        let mut rooms: Vec<i64> = self.joined_rooms.lock().iter().copied().collect();
        rooms.sort_unstable();
        rooms
    }

    /// Read frames until the peer goes away, the idle deadline passes, or the
    /// connection is closed from elsewhere.
    pub async fn read_loop<S, E>(
        self: &Arc<Self>,
        mut stream: S,
        state: &StateManager,
        pong_wait: Duration,
    ) -> Result<(), ChatError>
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        let mut closed = self.closed.subscribe();

        loop {
            let next = tokio::select! {
                _ = closed.wait_for(|closed| *closed) => return Ok(()),
                next = timeout(pong_wait, stream.next()) => next,
            };

            match next {
                Err(_) => return Err(ChatError::Timeout("read")),
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return Ok(()),
                Ok(Some(Err(e))) => return Err(ChatError::Transport(e.to_string())),
                Ok(Some(Ok(Message::Text(text)))) => self.handle_text(text.as_str(), state).await?,
                Ok(Some(Ok(Message::Binary(_)))) => {
                    return Err(ChatError::MalformedFrame("binary frames are not supported".into()))
                }
                // Ping/pong only refresh the idle deadline
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    /// Drain the outbound queue onto the socket, pinging every `ping_period`.
    ///
    /// Every write is bounded by `write_wait`; a failed or late write closes
    /// the connection. Frames queued before a close are flushed ahead of the
    /// close frame.
    pub async fn write_loop<W>(
        self: Arc<Self>,
        mut sink: W,
        mut outbound: mpsc::Receiver<Utf8Bytes>,
        ping_period: Duration,
        write_wait: Duration,
    ) -> Result<(), ChatError>
    where
        W: Sink<Message> + Unpin,
        W::Error: fmt::Display,
    {
        let mut ticker = interval_at(Instant::now() + ping_period, ping_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut closed = self.closed.subscribe();

        let result = loop {
            let frame = tokio::select! {
                _ = closed.wait_for(|closed| *closed) => None,
                frame = outbound.recv() => match frame {
                    Some(text) => Some(Message::Text(text)),
                    None => break Ok(()),
                },
                _ = ticker.tick() => Some(Message::Ping(Bytes::new())),
            };

            let Some(frame) = frame else {
                break flush_queued(&mut sink, &mut outbound, write_wait).await;
            };

            if let Err(e) = write_frame(&mut sink, frame, write_wait).await {
                break Err(e);
            }
        };

        let _ = write_frame(&mut sink, Message::Close(None), write_wait).await;
        self.close();
        result
    }

    /// Decode one text frame and act on it.
    ///
    /// Only transport-class errors are returned; room-scoped failures are
    /// answered with an `ERROR` envelope.
    pub async fn handle_text(self: &Arc<Self>, text: &str, state: &StateManager) -> Result<(), ChatError> {
        // A replaced connection may still hold frames it read before closing
        if self.is_closed() {
            return Err(ChatError::ConnectionClosed);
        }

        let envelope = Envelope::decode(text)?;
        let target = envelope.target.clone();

        match self.dispatch(envelope, state).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.id,
                    user_id = self.user.id,
                    error = %e,
                    "Chat action rejected"
                );
                self.send(Envelope::error(e.to_string(), target).to_frame());
                Ok(())
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, envelope: Envelope, state: &StateManager) -> Result<(), ChatError> {
        match envelope.action {
            Action::SendMessage => {
                let target = envelope.require_target()?;
                let content = envelope.require_content()?;
                let room = state
                    .find_room_by_id(target.id)
                    .ok_or(ChatError::RoomNotFound(target.id))?;
                room.broadcast(self, content.to_string()).await?;
                Ok(())
            }
            Action::JoinRoom => self.join(envelope.require_target()?, state).await,
            Action::LeaveRoom => self.leave(envelope.require_target()?.id, state).await,
            _ => Err(ChatError::InvalidEnvelope("action is not accepted from clients")),
        }
    }

    async fn join(self: &Arc<Self>, target: &RoomRef, state: &StateManager) -> Result<(), ChatError> {
        let room = state.find_or_create_room(target).await?;

        if !self.is_joined(room.id()) {
            state.join_room(room.id(), self).await?;
            self.mark_joined(room.id());
            tracing::debug!(
                connection_id = %self.id,
                user_id = self.user.id,
                room_id = room.id(),
                "Joined room"
            );
        }

        self.send(Envelope::room_joined(room.room_ref(), self.sender_ref()).to_frame());
        Ok(())
    }

    async fn leave(self: &Arc<Self>, room_id: i64, state: &StateManager) -> Result<(), ChatError> {
        if !self.mark_left(room_id) {
            return Err(ChatError::NotMember(room_id));
        }

        if let Err(e) = state.leave_room(room_id, self).await {
            self.mark_joined(room_id);
            return Err(e);
        }

        tracing::debug!(
            connection_id = %self.id,
            user_id = self.user.id,
            room_id,
            "Left room"
        );
        Ok(())
    }

    /// Disconnect cleanup. Runs at most once per connection.
    ///
    /// Detach requests to saturated rooms wait at most `unregister_timeout`.
    pub async fn disconnect(self: &Arc<Self>, state: &StateManager, unregister_timeout: Duration) {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return;
        }

        state.unregister_client(self);

        for room_id in self.joined_rooms() {
            if let Some(room) = state.find_room_by_id(room_id) {
                room.detach(self.clone(), unregister_timeout).await;
            }
        }

        self.close();

        tracing::info!(
            connection_id = %self.id,
            user_id = self.user.id,
            "Connection closed"
        );
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.user.uid)
            .field("joined_rooms", &self.joined_rooms())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Write whatever is already queued, all within one `write_wait`.
///
/// `send` refuses new frames once closed, so the queue only shrinks here.
async fn flush_queued<W>(
    sink: &mut W,
    outbound: &mut mpsc::Receiver<Utf8Bytes>,
    write_wait: Duration,
) -> Result<(), ChatError>
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    let deadline = Instant::now() + write_wait;
    while let Ok(text) = outbound.try_recv() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ChatError::Timeout("write"));
        }
        write_frame(sink, Message::Text(text), remaining).await?;
    }
    Ok(())
}

async fn write_frame<W>(sink: &mut W, frame: Message, write_wait: Duration) -> Result<(), ChatError>
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    match timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ChatError::Transport(e.to_string())),
        Err(_) => Err(ChatError::Timeout("write")),
    }
}
