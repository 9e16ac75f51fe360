//! # Domain Layer
//!
//! Chat records and the repository traits the chat core consumes.
//! Independent of any framework or infrastructure concern.

pub mod entities;

pub use entities::*;
