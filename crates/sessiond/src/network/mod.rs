//! Network transport.
//!
//! Serves the session registry to browser clients over a WebSocket, with a
//! small JSON API alongside it:
//! - `GET /ws/pty`: session control and output
//! - `GET /api/health`: liveness probe

pub mod auth;
pub mod broadcast;
pub mod server;

pub use broadcast::{BroadcastFanout, ClientId};
pub use server::{router, run, serve, ServerState, WS_PATH};
