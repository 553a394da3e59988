//! Front-end WebSocket handling.

pub mod bridge;
pub mod heartbeat;
pub mod session;
