//! # AgentDeck Session Host Library
//!
//! This crate hosts interactive terminal sessions of an external agent CLI and
//! exposes them to front ends.
//!
//! ## Overview
//!
//! - **Executable Resolution**: find the agent binary and build the PATH
//!   sessions run with, even when the host did not inherit a login shell
//! - **Session Registry**: spawn, drive and reap PTY sessions
//! - **Output Fan-out**: deliver session output and exits to a transport
//! - **Command Runner**: one-shot, non-interactive runs with a timeout
//! - **Network Transport**: WebSocket server with request/reply correlation
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐     ┌────────────────────┐
//! │  Desktop bridge    │     │  WebSocket server  │
//! │  (desktop crate)   │     │  (network)         │
//! └─────────┬──────────┘     └─────────┬──────────┘
//!           │ WindowFanout             │ BroadcastFanout
//!  ┌────────▼──────────┐      ┌────────▼──────────┐
//!  │  SessionRegistry  │      │  SessionRegistry  │
//!  └────────┬──────────┘      └────────┬──────────┘
//!           └────────────┬─────────────┘
//!                ┌───────▼───────┐
//!                │   Resolver    │
//!                └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sessiond::{Config, Resolver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let resolver = Arc::new(Resolver::new(config.resolver.clone()));
//!
//!     // Serves /ws/pty until Ctrl-C
//!     sessiond::network::run(&config, resolver).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`resolver`]: Agent binary lookup and PATH enrichment
//! - [`session`]: PTY sessions, registry and fan-out
//! - [`runner`]: Non-PTY command runner
//! - [`network`]: HTTP and WebSocket transport
//! - [`logging`]: Tracing setup

pub mod config;
pub mod logging;
pub mod network;
pub mod resolver;
pub mod runner;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;
pub use resolver::Resolver;
pub use runner::{CommandRunner, RunOutput, RunnerError};
pub use session::{
    OutputFanout, OutputPump, RegistryOptions, SessionError, SessionId, SessionRegistry,
    SpawnedSession,
};
