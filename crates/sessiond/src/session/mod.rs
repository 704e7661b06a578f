//! Session management module.
//!
//! This module provides PTY spawning and the registry of live sessions shared
//! by both transports. Output leaves through an [`OutputFanout`] supplied by
//! the transport.

pub mod command;
pub mod fanout;
pub mod pty;
pub mod registry;

pub use command::{shell_escape, LaunchPlan, ModelAllowList};
pub use fanout::{ChannelFanout, OutputFanout, SessionEvent};
pub use pty::{SessionError, SessionId, Utf8Decoder};
pub use registry::{OutputPump, RegistryOptions, SessionRegistry, SpawnedSession};
