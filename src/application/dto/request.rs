//! Request DTOs
//!
//! Data structures for API request bodies and query strings.

use serde::Deserialize;
use validator::Validate;

use crate::domain::RoomType;

/// Create room request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[serde(default)]
    pub room_type: RoomType,
}

/// History query parameters
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Only messages with an id below this one
    pub cursor: Option<i64>,
    /// Page size, clamped server-side
    pub limit: Option<i64>,
}

/// WebSocket upgrade query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    /// Credential for clients that cannot set headers
    pub token: Option<String>,
}
