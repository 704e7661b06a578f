//! Message definitions for the `/ws/pty` WebSocket endpoint.
//!
//! Every frame is a single JSON object with a `type` discriminator. Requests
//! that expect a reply carry a caller-chosen `reqId`, which the server echoes
//! back verbatim; unsolicited `data` and `exit` broadcasts carry none.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// Options accepted by a spawn request, on either transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnOptions {
    /// Working directory; the server picks one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Model identifier, checked against the transport's allow-list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Extra arguments appended to the agent invocation.
    #[serde(default)]
    pub args: Vec<String>,
    /// Spawn a plain login shell instead of the agent.
    #[serde(default)]
    pub shell: bool,
}

/// How a session's process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitInfo {
    /// Exit code reported by the OS (-1 when it could not be collected).
    pub exit_code: i32,
    /// Name of the terminating signal, if the process died from one.
    pub signal: Option<String>,
}

impl ExitInfo {
    /// An exit whose status could not be determined.
    pub fn unknown() -> Self {
        Self {
            exit_code: -1,
            signal: None,
        }
    }
}

/// Snapshot of one live session, as returned by `list-sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub pid: u32,
    pub model: String,
    pub cwd: String,
    /// Milliseconds since the Unix epoch.
    pub start_time: u64,
    pub active: bool,
}

/// Messages sent from a browser client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Start a new session.
    #[serde(rename = "spawn")]
    Spawn {
        #[serde(default)]
        options: SpawnOptions,
        #[serde(rename = "reqId", default)]
        req_id: Value,
    },
    /// Forward input to a session.
    #[serde(rename = "write")]
    Write { id: String, data: String },
    /// Change a session's terminal geometry.
    #[serde(rename = "resize")]
    Resize { id: String, cols: u16, rows: u16 },
    /// Terminate a session.
    #[serde(rename = "kill")]
    Kill { id: String },
    /// Request a snapshot of live sessions.
    #[serde(rename = "list-sessions")]
    ListSessions {
        #[serde(rename = "reqId", default)]
        req_id: Value,
    },
}

/// Every `type` value a client may send.
pub const CLIENT_MESSAGE_TYPES: &[&str] = &["spawn", "write", "resize", "kill", "list-sessions"];

impl ClientMessage {
    /// Decodes a client frame.
    ///
    /// Distinguishes frames that are not JSON objects at all from frames with
    /// an unrecognised `type`, so the server can log them differently.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing `type` field".to_string()))?;

        if !CLIENT_MESSAGE_TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Serializes the message to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// The correlation id carried by this message, if it expects a reply.
    pub fn req_id(&self) -> Option<&Value> {
        match self {
            ClientMessage::Spawn { req_id, .. } | ClientMessage::ListSessions { req_id } => {
                Some(req_id)
            }
            _ => None,
        }
    }
}

/// Messages sent from the server to browser clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// A spawn request succeeded.
    #[serde(rename = "spawn_success")]
    SpawnSuccess {
        #[serde(rename = "reqId")]
        req_id: Value,
        id: String,
        pid: u32,
    },
    /// A spawn request was rejected or failed.
    #[serde(rename = "spawn_error")]
    SpawnError {
        #[serde(rename = "reqId")]
        req_id: Value,
        error: String,
    },
    /// Output from a session, broadcast to every client.
    #[serde(rename = "data")]
    Data { id: String, data: String },
    /// A session's process exited, broadcast to every client.
    #[serde(rename = "exit")]
    Exit {
        id: String,
        #[serde(rename = "exitCode")]
        exit_code: i32,
        signal: Option<String>,
    },
    /// Reply to `list-sessions`.
    #[serde(rename = "list-sessions_success")]
    ListSessionsSuccess {
        #[serde(rename = "reqId")]
        req_id: Value,
        sessions: Vec<SessionSummary>,
    },
}

impl ServerMessage {
    /// Builds an `exit` broadcast from an [`ExitInfo`].
    pub fn exit(id: impl Into<String>, info: &ExitInfo) -> Self {
        ServerMessage::Exit {
            id: id.into(),
            exit_code: info.exit_code,
            signal: info.signal.clone(),
        }
    }

    /// Serializes the message to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Decodes a server frame (used by clients and tests).
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// The correlation id echoed by this message, if it is a reply.
    pub fn req_id(&self) -> Option<&Value> {
        match self {
            ServerMessage::SpawnSuccess { req_id, .. }
            | ServerMessage::SpawnError { req_id, .. }
            | ServerMessage::ListSessionsSuccess { req_id, .. } => Some(req_id),
            ServerMessage::Data { .. } | ServerMessage::Exit { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_spawn_with_options() {
        let msg = ClientMessage::from_json(
            r#"{"type":"spawn","reqId":"r-1","options":{"cwd":"/tmp","model":"opus","args":["--verbose"]}}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            ClientMessage::Spawn {
                options: SpawnOptions {
                    cwd: Some("/tmp".to_string()),
                    model: Some("opus".to_string()),
                    args: vec!["--verbose".to_string()],
                    shell: false,
                },
                req_id: json!("r-1"),
            }
        );
    }

    #[test]
    fn test_decode_spawn_without_options() {
        let msg = ClientMessage::from_json(r#"{"type":"spawn","reqId":7}"#).unwrap();
        match msg {
            ClientMessage::Spawn { options, req_id } => {
                assert_eq!(options, SpawnOptions::default());
                assert_eq!(req_id, json!(7));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_list_sessions() {
        let msg = ClientMessage::from_json(r#"{"type":"list-sessions","reqId":"abc"}"#).unwrap();
        assert_eq!(msg.req_id(), Some(&json!("abc")));
    }

    #[test]
    fn test_decode_write_has_no_req_id() {
        let msg = ClientMessage::from_json(r#"{"type":"write","id":"pty-1-0","data":"ls\r"}"#)
            .unwrap();
        assert_eq!(msg.req_id(), None);
        assert_eq!(
            msg,
            ClientMessage::Write {
                id: "pty-1-0".to_string(),
                data: "ls\r".to_string()
            }
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = ClientMessage::from_json(r#"{"type":"teleport"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(t) if t == "teleport"));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(ClientMessage::from_json("not json").unwrap_err().is_malformed());
        assert!(ClientMessage::from_json(r#"{"id":"x"}"#)
            .unwrap_err()
            .is_malformed());
        // Known type but missing required fields.
        assert!(ClientMessage::from_json(r#"{"type":"resize","id":"x"}"#)
            .unwrap_err()
            .is_malformed());
    }

    #[test]
    fn test_encode_spawn_success_wire_shape() {
        let msg = ServerMessage::SpawnSuccess {
            req_id: json!("r-9"),
            id: "pty-3-1700000000000".to_string(),
            pid: 4242,
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "spawn_success", "reqId": "r-9", "id": "pty-3-1700000000000", "pid": 4242})
        );
    }

    #[test]
    fn test_encode_exit_wire_shape() {
        let info = ExitInfo {
            exit_code: 0,
            signal: None,
        };
        let value: Value =
            serde_json::from_str(&ServerMessage::exit("pty-1-5", &info).to_json().unwrap())
                .unwrap();
        assert_eq!(
            value,
            json!({"type": "exit", "id": "pty-1-5", "exitCode": 0, "signal": null})
        );
    }

    #[test]
    fn test_encode_list_sessions_success() {
        let msg = ServerMessage::ListSessionsSuccess {
            req_id: json!(3),
            sessions: vec![SessionSummary {
                id: "pty-1-5".to_string(),
                pid: 10,
                model: "default".to_string(),
                cwd: "/tmp".to_string(),
                start_time: 1_700_000_000_000,
                active: true,
            }],
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "list-sessions_success");
        assert_eq!(value["sessions"][0]["startTime"], 1_700_000_000_000u64);
        assert_eq!(value["sessions"][0]["active"], true);
    }

    #[test]
    fn test_req_id_echoed_verbatim() {
        // Numbers, strings and objects all survive unchanged.
        for req_id in [json!(1), json!("a-b"), json!({"n": 1})] {
            let msg = ServerMessage::SpawnError {
                req_id: req_id.clone(),
                error: "nope".to_string(),
            };
            let back = ServerMessage::from_json(&msg.to_json().unwrap()).unwrap();
            assert_eq!(back.req_id(), Some(&req_id));
        }
    }
}
