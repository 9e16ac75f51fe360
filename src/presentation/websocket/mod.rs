//! Chat WebSocket core
//!
//! - `protocol`: JSON envelope and action vocabulary
//! - `connection`: per-socket read/write loops
//! - `room`: per-room serialized event loop
//! - `state`: process-wide client and room registry
//! - `gateway`: socket admission, seeding and startup reconciliation
//! - `handler`: authenticated upgrade route

pub mod connection;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod protocol;
pub mod room;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::Connection;
pub use error::ChatError;
pub use gateway::{ChatGateway, GatewayStats};
pub use handler::ws_handler;
pub use protocol::{Action, Envelope, RoomRef, SenderRef};
pub use room::Room;
pub use state::StateManager;
