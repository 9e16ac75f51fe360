//! Chat Gateway
//!
//! Accepts authenticated sockets, turns them into registered connections
//! seeded with their persisted room memberships, and drives their loops.
//! On startup it rebuilds the live room graph from persisted memberships.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures::{Sink, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use super::connection::Connection;
use super::error::ChatError;
use super::protocol::Envelope;
use super::state::StateManager;
use crate::application::services::{AuthError, AuthVerifier};
use crate::config::WebSocketSettings;
use crate::domain::{ChatRepository, User};

/// Live counters reported by the readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub rooms: usize,
}

/// Entry point for chat sockets.
pub struct ChatGateway {
    state: Arc<StateManager>,
    chat_repo: Arc<dyn ChatRepository>,
    auth: Arc<dyn AuthVerifier>,
    settings: WebSocketSettings,
}

impl ChatGateway {
    pub fn new(
        state: Arc<StateManager>,
        chat_repo: Arc<dyn ChatRepository>,
        auth: Arc<dyn AuthVerifier>,
        settings: WebSocketSettings,
    ) -> Self {
        Self {
            state,
            chat_repo,
            auth,
            settings,
        }
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn settings(&self) -> &WebSocketSettings {
        &self.settings
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.state.client_count(),
            rooms: self.state.room_count(),
        }
    }

    /// Start a live room for every room with an active membership.
    /// Returns the number of rooms restored.
    pub async fn reconcile(&self) -> Result<usize, ChatError> {
        let memberships = self.chat_repo.find_user_chat_rooms().await?;
        let mut restored = HashSet::new();

        for membership in memberships {
            if restored.insert(membership.room.id) {
                self.state.restore_room(membership.room);
            }
        }

        tracing::info!(rooms = restored.len(), "Chat rooms reconciled");
        Ok(restored.len())
    }

    /// Resolve a credential to a user through the auth collaborator.
    pub async fn authenticate(&self, credential: &str) -> Result<User, AuthError> {
        self.auth.verify_auth_and_get_user(credential).await
    }

    /// Build and register a connection for an authenticated user, attaching
    /// it to every room the user is a persisted member of.
    pub async fn open_connection(
        &self,
        user: User,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<Utf8Bytes>), ChatError> {
        let rooms = self.chat_repo.find_chat_rooms_by_user(user.id).await?;
        let (conn, outbound) = Connection::new(user, &self.settings);

        if let Some(previous) = self.state.register_client(conn.clone()) {
            previous.close();
        }

        for persisted in rooms {
            let room = self.state.restore_room(persisted);
            match room.register(conn.clone()).await {
                Ok(()) => {
                    conn.mark_joined(room.id());
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %conn.id(),
                        room_id = room.id(),
                        error = %e,
                        "Could not attach connection to room"
                    );
                }
            }
        }

        tracing::info!(
            connection_id = %conn.id(),
            user_id = conn.user().id,
            rooms = ?conn.joined_rooms(),
            "Connection opened"
        );
        Ok((conn, outbound))
    }

    /// Run a connection until either loop ends, then clean up.
    pub async fn serve<S, E, W>(
        &self,
        conn: Arc<Connection>,
        outbound: mpsc::Receiver<Utf8Bytes>,
        stream: S,
        sink: W,
    ) where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: fmt::Display + Send,
    {
        let writer = tokio::spawn(conn.clone().write_loop(
            sink,
            outbound,
            self.settings.ping_period(),
            self.settings.write_wait(),
        ));

        if let Err(e) = conn
            .read_loop(stream, &self.state, self.settings.pong_wait())
            .await
        {
            tracing::debug!(connection_id = %conn.id(), error = %e, "Read loop ended");
        }

        conn.disconnect(&self.state, self.settings.unregister_timeout())
            .await;

        match writer.await {
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %conn.id(), error = %e, "Write loop ended")
            }
            Err(e) => tracing::error!(connection_id = %conn.id(), error = %e, "Write loop panicked"),
            Ok(Ok(())) => {}
        }
    }

    /// Serve an upgraded socket for an authenticated user.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, user: User) {
        let user_id = user.id;
        let (sink, stream) = socket.split();

        match self.open_connection(user).await {
            Ok((conn, outbound)) => self.serve(conn, outbound, stream, sink).await,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Failed to open chat connection");
            }
        }
    }

    /// Tell every client the server is going away and close them.
    pub fn shutdown(&self) {
        let notified = self
            .state
            .broadcast_to_all_clients(Envelope::error("server is shutting down", None).to_frame());
        self.state.close_all_clients();
        tracing::info!(clients = notified, "Chat gateway shut down");
    }
}
