//! Data Transfer Objects
//!
//! DTOs for API request/response serialization.

pub mod request;
pub mod response;

pub use request::{ConnectQuery, CreateRoomRequest, HistoryQuery};
pub use response::{MessagePageResponse, MessageResponse, RoomResponse};
