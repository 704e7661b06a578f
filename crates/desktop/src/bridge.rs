//! Channel dispatch for the desktop binding.
//!
//! The renderer calls [`DesktopBridge::invoke`] with a channel name and a JSON
//! payload. Handle channels answer with a value; send channels answer with
//! nothing. Session output is pushed to the window that spawned the session.

use std::sync::Arc;

use protocol::ipc::{
    self, ExecRequest, KillPayload, ResizePayload, ScriptRequest, SlashCommandRequest,
    SpawnReply, WritePayload,
};
use protocol::{ProtocolError, SpawnOptions};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sessiond::config::RunnerConfig;
use sessiond::{
    CommandRunner, Config, RegistryOptions, Resolver, RunnerError, SessionRegistry,
    SpawnedSession,
};

use crate::window::{WindowFanout, WindowHandle};

/// Error returned to the renderer.
///
/// Serializable so the shell can hand it across the IPC boundary as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct IpcError {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl IpcError {
    pub const UNKNOWN_CHANNEL: &'static str = "UNKNOWN_CHANNEL";
    pub const INVALID_PAYLOAD: &'static str = "INVALID_PAYLOAD";
    pub const RUNNER_ERROR: &'static str = "RUNNER_ERROR";
    pub const INTERNAL: &'static str = "INTERNAL";

    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<ProtocolError> for IpcError {
    fn from(e: ProtocolError) -> Self {
        Self::new(Self::INVALID_PAYLOAD, e.to_string())
    }
}

impl From<RunnerError> for IpcError {
    fn from(e: RunnerError) -> Self {
        Self::new(Self::RUNNER_ERROR, e.to_string())
    }
}

/// Result type for bridge calls.
pub type IpcResult<T> = Result<T, IpcError>;

/// The desktop host's view of the session registry and command runner.
pub struct DesktopBridge {
    registry: Arc<SessionRegistry>,
    fanout: Arc<WindowFanout>,
    runner: CommandRunner,
}

impl DesktopBridge {
    /// Builds a bridge with the desktop model list and the current directory
    /// as the default working directory.
    pub fn new(config: &Config, resolver: Arc<Resolver>) -> Self {
        Self::with_options(RegistryOptions::desktop(&config.session), resolver, &config.runner)
    }

    pub fn with_options(
        options: RegistryOptions,
        resolver: Arc<Resolver>,
        runner: &RunnerConfig,
    ) -> Self {
        let fanout = Arc::new(WindowFanout::new());
        let runner = CommandRunner::new(Arc::clone(&resolver), options.agent_program.clone(), runner);
        let registry = Arc::new(SessionRegistry::new(options, resolver, fanout.clone()));
        Self {
            registry,
            fanout,
            runner,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handles one request from `window`.
    pub async fn invoke(
        &self,
        channel: &str,
        payload: Value,
        window: Arc<dyn WindowHandle>,
    ) -> IpcResult<Option<Value>> {
        tracing::trace!(channel, "IPC request");

        match channel {
            ipc::PTY_SPAWN => {
                let options: SpawnOptions = decode_or_default(channel, payload)?;
                reply(self.spawn(options, window).await?)
            }
            ipc::PTY_WRITE => {
                let WritePayload { id, data } = ipc::decode_payload(channel, payload)?;
                self.registry.write(&id, &data);
                Ok(None)
            }
            ipc::PTY_RESIZE => {
                let ResizePayload { id, cols, rows } = ipc::decode_payload(channel, payload)?;
                self.registry.resize(&id, cols, rows);
                Ok(None)
            }
            ipc::PTY_KILL => {
                let KillPayload { id } = ipc::decode_payload(channel, payload)?;
                self.registry.kill(&id);
                Ok(None)
            }
            ipc::PTY_LIST_SESSIONS => reply(self.registry.list()),
            ipc::CLI_CHECK => reply(self.runner.check().await),
            ipc::CLI_EXEC => {
                let request: ExecRequest = ipc::decode_payload(channel, payload)?;
                reply(self.runner.exec_prompt(&request).await)
            }
            ipc::CLI_SLASH_COMMAND => {
                let request: SlashCommandRequest = ipc::decode_payload(channel, payload)?;
                reply(self.runner.slash_command(&request).await)
            }
            ipc::CLI_GET_INFO => reply(self.runner.info().await),
            ipc::SCRIPT_RUN => {
                let request: ScriptRequest = ipc::decode_payload(channel, payload)?;
                reply(self.runner.run_script(&request).await?)
            }
            _ => Err(IpcError::new(
                IpcError::UNKNOWN_CHANNEL,
                format!("Unknown channel: {}", channel),
            )),
        }
    }

    /// Spawns a session owned by `window`.
    ///
    /// Spawn failures are part of the reply, not an [`IpcError`].
    async fn spawn(
        &self,
        options: SpawnOptions,
        window: Arc<dyn WindowHandle>,
    ) -> IpcResult<SpawnReply> {
        let registry = Arc::clone(&self.registry);
        let result = tokio::task::spawn_blocking(move || registry.spawn(options))
            .await
            .map_err(|e| IpcError::new(IpcError::INTERNAL, format!("spawn task failed: {}", e)))?;

        match result {
            Ok(SpawnedSession { id, pid, pump }) => {
                self.fanout.attach(&id, window);
                pump.start();
                Ok(SpawnReply::spawned(id, pid))
            }
            Err(e) => Ok(SpawnReply::failed(e.to_string())),
        }
    }

    /// Kills every live session.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

fn decode_or_default<T: DeserializeOwned + Default>(channel: &str, payload: Value) -> IpcResult<T> {
    if payload.is_null() {
        return Ok(T::default());
    }
    Ok(ipc::decode_payload(channel, payload)?)
}

fn reply<T: Serialize>(value: T) -> IpcResult<Option<Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| IpcError::new(IpcError::INTERNAL, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ipc_error_display_and_shape() {
        let err = IpcError::new(IpcError::UNKNOWN_CHANNEL, "Unknown channel: fs:read");
        assert_eq!(err.to_string(), "UNKNOWN_CHANNEL: Unknown channel: fs:read");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"code": "UNKNOWN_CHANNEL", "message": "Unknown channel: fs:read"})
        );
    }

    #[test]
    fn test_protocol_error_is_invalid_payload() {
        let err: IpcError = ipc::decode_payload::<KillPayload>(ipc::PTY_KILL, json!({}))
            .unwrap_err()
            .into();
        assert_eq!(err.code, IpcError::INVALID_PAYLOAD);
        assert!(err.message.contains(ipc::PTY_KILL));
    }

    #[test]
    fn test_null_spawn_payload_uses_defaults() {
        let options: SpawnOptions = decode_or_default(ipc::PTY_SPAWN, Value::Null).unwrap();
        assert_eq!(options, SpawnOptions::default());

        let options: SpawnOptions =
            decode_or_default(ipc::PTY_SPAWN, json!({"model": "opus", "shell": true})).unwrap();
        assert_eq!(options.model.as_deref(), Some("opus"));
        assert!(options.shell);
    }
}
