//! # AgentDeck Desktop Binding
//!
//! In-process bridge between a desktop shell's renderer and the session
//! registry. The renderer invokes named channels (`pty:spawn`, `pty:write`,
//! ...) and receives `pty:data` and `pty:exit` pushes on the window that
//! spawned each session.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Renderer                    │
//! └───────────┬─────────────────────▲────────────┘
//!             │ invoke(channel)     │ pty:data / pty:exit
//! ┌───────────▼──────────┐  ┌───────┴────────────┐
//! │    DesktopBridge     │  │   WindowFanout     │
//! └───────────┬──────────┘  └───────▲────────────┘
//!             │                     │
//! ┌───────────▼─────────────────────┴────────────┐
//! │        SessionRegistry / CommandRunner       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use desktop::{ChannelWindow, DesktopBridge};
//! use sessiond::{Config, Resolver};
//!
//! # async fn demo() -> Result<(), desktop::IpcError> {
//! let config = Config::default();
//! let resolver = Arc::new(Resolver::new(config.resolver.clone()));
//! let bridge = DesktopBridge::new(&config, resolver);
//!
//! let (window, mut events) = ChannelWindow::new();
//! let reply = bridge
//!     .invoke("pty:spawn", serde_json::json!({"cwd": "/tmp"}), window)
//!     .await?;
//! println!("{:?}", reply);
//!
//! while let Some(event) = events.recv().await {
//!     println!("{} {}", event.channel, event.payload);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `tauri`: a [`WindowHandle`] for Tauri webview windows and a `pty_invoke`
//!   command.

pub mod bridge;
#[cfg(feature = "tauri")]
pub mod webview;
pub mod window;

// Re-export protocol for convenience
pub use protocol;

pub use bridge::{DesktopBridge, IpcError, IpcResult};
pub use window::{ChannelWindow, WindowEvent, WindowFanout, WindowHandle};
