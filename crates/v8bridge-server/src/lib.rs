//! # v8bridge-server
//!
//! The running bridge: an Axum WebSocket listener for front-ends and an actor
//! per debuggee connection.
//!
//! - [`server`]: router, listener, and the `/ws` and `/health` handlers
//! - [`websocket`]: per-session relay, heartbeat, and lifecycle
//! - [`debuggee`]: the TCP connection to the V8 debugger and the managed runtime
//! - [`registry`]: live sessions and exclusive-policy displacement
//! - [`shutdown`]: graceful shutdown coordination

#![deny(unsafe_code)]

pub mod debuggee;
pub mod health;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use debuggee::{ConnectionState, DebuggeeEvent, DebuggeeHandle, DebuggeeStatus};
pub use server::BridgeServer;
pub use shutdown::ShutdownCoordinator;
