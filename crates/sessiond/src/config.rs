//! Configuration management for the AgentDeck session host.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/agentdeck/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("terminal geometry must be non-zero, got {cols}x{rows}")]
    InvalidGeometry { cols: u16, rows: u16 },

    #[error("agent_program must not be empty")]
    EmptyAgentProgram,

    #[error("{0} model allow-list must not be empty")]
    EmptyModelList(&'static str),

    #[error("{0} must be greater than 0")]
    ZeroTimeout(&'static str),

    #[error("port must be greater than 0")]
    InvalidPort,
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Default terminal geometry for new sessions.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 30;

/// Models accepted by the desktop binding (local CLI aliases and ids).
pub const DEFAULT_DESKTOP_MODELS: &[&str] = &[
    "opus",
    "sonnet",
    "haiku",
    "claude-3-opus",
    "claude-3-sonnet",
    "claude-3-haiku",
    "claude-sonnet-4-5-20250929",
    "claude-opus-4-6",
];

/// Models accepted by the network binding (fully-qualified hosted ids).
pub const DEFAULT_NETWORK_MODELS: &[&str] = &[
    "bedrock/anthropic.claude-3-opus-20240229-v1:0",
    "bedrock/anthropic.claude-3-5-sonnet-20241022-v2:0",
    "bedrock/anthropic.claude-3-5-haiku-20241022-v1:0",
];

/// Main configuration structure for the session host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General host configuration.
    pub daemon: DaemonConfig,

    /// WebSocket server configuration.
    pub server: ServerConfig,

    /// Session spawning configuration.
    pub session: SessionConfig,

    /// Executable resolution configuration.
    pub resolver: ResolverConfig,

    /// One-shot command runner configuration.
    pub runner: RunnerConfig,
}

/// General host configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for rolling log files. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

/// WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: String,

    /// TCP port.
    pub port: u16,

    /// Bearer token required on `/api` and `/ws`. Open sandbox when unset.
    pub auth_token: Option<String>,
}

/// Session spawning configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Name or path of the agent CLI.
    pub agent_program: String,

    /// Shell used to launch sessions. Falls back to `$SHELL`, then `/bin/bash`.
    pub shell: Option<String>,

    /// Initial terminal columns.
    pub cols: u16,

    /// Initial terminal rows.
    pub rows: u16,

    /// Models the desktop binding accepts.
    pub desktop_models: Vec<String>,

    /// Models the network binding accepts.
    pub network_models: Vec<String>,
}

/// Executable resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Ask the user's login shell for its PATH.
    pub probe_login_shell: bool,

    /// How long the login shell may take before it is abandoned.
    pub login_shell_timeout_ms: u64,
}

/// One-shot command runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Default wall-clock limit for a run.
    pub timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            auth_token: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agent_program: "claude".to_string(),
            shell: None,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            desktop_models: DEFAULT_DESKTOP_MODELS.iter().map(|m| m.to_string()).collect(),
            network_models: DEFAULT_NETWORK_MODELS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            probe_login_shell: true,
            login_shell_timeout_ms: 5_000,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
        }
    }
}

impl SessionConfig {
    /// The shell sessions are launched through.
    pub fn resolved_shell(&self) -> String {
        self.shell.clone().unwrap_or_else(default_shell)
    }
}

impl ResolverConfig {
    pub fn login_shell_timeout(&self) -> Duration {
        Duration::from_millis(self.login_shell_timeout_ms)
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentdeck")
        .join("config.toml")
}

/// Returns the shell named by `$SHELL`, or `/bin/bash`.
pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/bash".to_string())
}

/// One environment variable that changed, or failed to change, the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvOverride {
    Applied { var: &'static str, field: &'static str },
    Ignored { var: &'static str, value: String },
}

impl EnvOverride {
    /// Log the override. Call once the subscriber is installed.
    pub fn log(&self) {
        match self {
            Self::Applied { var, field } => {
                tracing::info!(var, field, "Configuration overridden from environment")
            }
            Self::Ignored { var, value } => {
                tracing::warn!(var, value = %value, "Ignoring unparseable environment value")
            }
        }
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - AGENTDECK_LOG_LEVEL: Override log level
    /// - AGENTDECK_PORT or PORT: Override the server port
    /// - AGENTDECK_AUTH_TOKEN: Require this bearer token
    ///
    /// Runs before logging is set up, so what changed is returned for the
    /// caller to log later.
    pub fn apply_env_overrides(&mut self) -> Vec<EnvOverride> {
        let mut applied = Vec::new();

        if let Ok(level) = std::env::var("AGENTDECK_LOG_LEVEL") {
            if !level.is_empty() {
                self.daemon.log_level = level;
                applied.push(EnvOverride::Applied {
                    var: "AGENTDECK_LOG_LEVEL",
                    field: "daemon.log_level",
                });
            }
        }

        let port = std::env::var("AGENTDECK_PORT")
            .ok()
            .map(|p| ("AGENTDECK_PORT", p))
            .or_else(|| std::env::var("PORT").ok().map(|p| ("PORT", p)));
        if let Some((var, port)) = port {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.server.port = port;
                    applied.push(EnvOverride::Applied {
                        var,
                        field: "server.port",
                    });
                }
                Err(_) => applied.push(EnvOverride::Ignored { var, value: port }),
            }
        }

        if let Ok(token) = std::env::var("AGENTDECK_AUTH_TOKEN") {
            if !token.is_empty() {
                self.server.auth_token = Some(token);
                applied.push(EnvOverride::Applied {
                    var: "AGENTDECK_AUTH_TOKEN",
                    field: "server.auth_token",
                });
            }
        }

        applied
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.session.cols == 0 || self.session.rows == 0 {
            return Err(ConfigError::InvalidGeometry {
                cols: self.session.cols,
                rows: self.session.rows,
            });
        }

        if self.session.agent_program.trim().is_empty() {
            return Err(ConfigError::EmptyAgentProgram);
        }

        if self.session.desktop_models.is_empty() {
            return Err(ConfigError::EmptyModelList("desktop"));
        }
        if self.session.network_models.is_empty() {
            return Err(ConfigError::EmptyModelList("network"));
        }

        if self.resolver.probe_login_shell && self.resolver.login_shell_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("login_shell_timeout_ms"));
        }
        if self.runner.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("timeout_ms"));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
