//! # AgentDeck Protocol Library
//!
//! Shared message definitions for the two ways a front end can drive agent
//! terminal sessions:
//!
//! - **WebSocket** (`/ws/pty`): `type`-tagged JSON envelopes, with `reqId`
//!   correlation for requests and unsolicited `data`/`exit` broadcasts.
//! - **Desktop IPC**: named channels (`pty:spawn`, `pty:data`, ...) carrying
//!   the same session data as plain JSON payloads.
//!
//! ## Example
//!
//! ```rust
//! use protocol::{ClientMessage, ServerMessage};
//!
//! let msg = ClientMessage::from_json(r#"{"type":"list-sessions","reqId":1}"#).unwrap();
//! let reply = ServerMessage::ListSessionsSuccess {
//!     req_id: msg.req_id().cloned().unwrap_or_default(),
//!     sessions: Vec::new(),
//! };
//! assert!(reply.to_json().unwrap().contains("list-sessions_success"));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: WebSocket envelopes and shared session types
//! - [`ipc`]: desktop channel names and payloads
//! - [`error`]: error types

pub mod error;
pub mod ipc;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use ipc::{channel_kind, ChannelKind, SpawnReply};
pub use messages::{ClientMessage, ExitInfo, ServerMessage, SessionSummary, SpawnOptions};
