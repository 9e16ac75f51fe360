//! Room Handlers

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::application::dto::{CreateRoomRequest, HistoryQuery, MessagePageResponse, RoomResponse};
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::shared::validation::validation_error;
use crate::startup::AppState;

/// Create a room and start its live event loop
pub async fn create_room(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomResponse>), AppError> {
    body.validate().map_err(validation_error)?;
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name: Name must be 1-100 characters".into()));
    }

    let room = state.chat.create_room(name, body.room_type).await?;

    // Re-read for the persisted timestamps
    let created = state
        .chat_repo
        .find_room_by_id(room.id())
        .await?
        .ok_or_else(|| AppError::Internal(format!("Room {} vanished after create", room.id())))?;

    tracing::info!(room_id = created.id, user_id = user.id, "Room created over REST");

    Ok((StatusCode::CREATED, Json(RoomResponse::from(created))))
}

/// Page through a room's message history
pub async fn get_room_messages(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(room_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagePageResponse>, AppError> {
    let page = state
        .history
        .room_history(&user, room_id, query.cursor, query.limit)
        .await?;

    Ok(Json(MessagePageResponse::from(page)))
}

/// Rooms the caller is a member of
pub async fn get_my_rooms(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<RoomResponse>>, AppError> {
    let rooms = state.history.user_rooms(&user).await?;

    Ok(Json(rooms.into_iter().map(RoomResponse::from).collect()))
}
