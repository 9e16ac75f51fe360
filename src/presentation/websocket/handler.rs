//! WebSocket Upgrade Handler
//!
//! Authenticates before upgrading: the credential comes from
//! `Authorization: Bearer <token>` or, for browsers, `?token=<token>`.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};

use crate::application::dto::ConnectQuery;
use crate::presentation::middleware::auth::bearer_token;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let credential = bearer_token(&headers)
        .map(str::to_owned)
        .or(query.token)
        .ok_or_else(|| AppError::Unauthorized("Missing credential".into()))?;

    let user = state.gateway.authenticate(&credential).await.map_err(|e| {
        tracing::debug!(error = %e, "WebSocket authentication failed");
        AppError::from(e)
    })?;

    tracing::debug!(user_id = user.id, "Upgrading chat connection");

    let gateway = state.gateway.clone();
    Ok(ws
        .max_message_size(state.settings.websocket.max_message_size)
        .on_upgrade(move |socket| gateway.handle_socket(socket, user)))
}
