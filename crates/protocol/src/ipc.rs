//! Desktop IPC channel names and payloads.
//!
//! The desktop shell talks to the host process over named channels. Handle
//! channels return a value to the caller; send channels are fire-and-forget.
//! Push channels carry events the host emits without being asked.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::messages::ExitInfo;

/// Spawn a session (handle).
pub const PTY_SPAWN: &str = "pty:spawn";
/// Forward input to a session (send).
pub const PTY_WRITE: &str = "pty:write";
/// Resize a session (send).
pub const PTY_RESIZE: &str = "pty:resize";
/// Kill a session (send).
pub const PTY_KILL: &str = "pty:kill";
/// List live sessions (handle).
pub const PTY_LIST_SESSIONS: &str = "pty:list-sessions";
/// Output pushed to the window.
pub const PTY_DATA: &str = "pty:data";
/// Exit pushed to the window.
pub const PTY_EXIT: &str = "pty:exit";

/// Check whether the agent CLI is installed (handle).
pub const CLI_CHECK: &str = "cli:check";
/// Run a single prompt to completion (handle).
pub const CLI_EXEC: &str = "cli:exec";
/// Run a slash command to completion (handle).
pub const CLI_SLASH_COMMAND: &str = "cli:slash-command";
/// Report agent and host paths (handle).
pub const CLI_GET_INFO: &str = "cli:get-info";
/// Run a script with the interpreter chosen by its extension (handle).
pub const SCRIPT_RUN: &str = "script:run";

/// Whether a channel returns a value to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Request/response.
    Handle,
    /// Fire-and-forget.
    Send,
}

/// Classifies a request channel, or `None` if the name is unknown.
pub fn channel_kind(channel: &str) -> Option<ChannelKind> {
    match channel {
        PTY_SPAWN | PTY_LIST_SESSIONS | CLI_CHECK | CLI_EXEC | CLI_SLASH_COMMAND
        | CLI_GET_INFO | SCRIPT_RUN => Some(ChannelKind::Handle),
        PTY_WRITE | PTY_RESIZE | PTY_KILL => Some(ChannelKind::Send),
        _ => None,
    }
}

/// Decodes the payload of a named channel.
pub fn decode_payload<T: DeserializeOwned>(channel: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        channel: channel.to_string(),
        reason: e.to_string(),
    })
}

/// Result of `pty:spawn`: either `{id, pid}` or `{id: null, error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnReply {
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SpawnReply {
    pub fn spawned(id: impl Into<String>, pid: u32) -> Self {
        Self {
            id: Some(id.into()),
            pid: Some(pid),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            id: None,
            pid: None,
            error: Some(error.into()),
        }
    }
}

/// Payload of `pty:write`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePayload {
    pub id: String,
    pub data: String,
}

/// Payload of `pty:resize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizePayload {
    pub id: String,
    pub cols: u16,
    pub rows: u16,
}

/// Payload of `pty:kill`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillPayload {
    pub id: String,
}

/// Event pushed on `pty:data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEvent {
    pub id: String,
    pub data: String,
}

/// Event pushed on `pty:exit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitEvent {
    pub id: String,
    pub exit_code: i32,
    pub signal: Option<String>,
}

impl ExitEvent {
    pub fn new(id: impl Into<String>, info: &ExitInfo) -> Self {
        Self {
            id: id.into(),
            exit_code: info.exit_code,
            signal: info.signal.clone(),
        }
    }
}

/// Payload of `cli:exec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Milliseconds; the host default applies when absent.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Payload of `cli:slash-command`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommandRequest {
    pub command: String,
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Payload of `script:run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}
