//! Push delivery to desktop windows.
//!
//! Every session belongs to the window that spawned it. [`WindowFanout`]
//! remembers that owner and pushes `pty:data` and `pty:exit` events to it,
//! skipping the push once the window has been torn down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use protocol::ipc::{DataEvent, ExitEvent, PTY_DATA, PTY_EXIT};
use protocol::ExitInfo;
use serde::Serialize;
use serde_json::Value;
use sessiond::{OutputFanout, SessionId};
use tokio::sync::mpsc;

/// A UI surface that can receive push events.
pub trait WindowHandle: Send + Sync + 'static {
    /// True once the window is gone and pushes would go nowhere.
    fn is_destroyed(&self) -> bool;

    /// Push an event on a named channel.
    fn emit(&self, channel: &str, payload: Value);
}

/// Routes session events to the owning window.
#[derive(Default)]
pub struct WindowFanout {
    owners: RwLock<HashMap<SessionId, Arc<dyn WindowHandle>>>,
}

impl WindowFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `window` as the owner of `session_id`.
    ///
    /// Must happen before the session's pump starts, or early output is lost.
    pub fn attach(&self, session_id: &str, window: Arc<dyn WindowHandle>) {
        self.owners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), window);
    }

    /// Number of sessions with an owner.
    pub fn attached(&self) -> usize {
        self.owners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn owner(&self, session_id: &str) -> Option<Arc<dyn WindowHandle>> {
        self.owners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    fn detach(&self, session_id: &str) -> Option<Arc<dyn WindowHandle>> {
        self.owners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
    }
}

fn push<T: Serialize>(window: &dyn WindowHandle, channel: &str, event: &T) {
    if window.is_destroyed() {
        return;
    }
    match serde_json::to_value(event) {
        Ok(payload) => window.emit(channel, payload),
        Err(e) => tracing::warn!(channel, error = %e, "Failed to encode window event"),
    }
}

impl OutputFanout for WindowFanout {
    fn data(&self, session_id: &str, chunk: &str) {
        if let Some(window) = self.owner(session_id) {
            push(
                window.as_ref(),
                PTY_DATA,
                &DataEvent {
                    id: session_id.to_string(),
                    data: chunk.to_string(),
                },
            );
        }
    }

    fn exit(&self, session_id: &str, exit: &ExitInfo) {
        match self.detach(session_id) {
            Some(window) => push(window.as_ref(), PTY_EXIT, &ExitEvent::new(session_id, exit)),
            None => tracing::debug!(session_id, "Exit for a session without a window"),
        }
    }
}

/// An event received by a [`ChannelWindow`].
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEvent {
    pub channel: String,
    pub payload: Value,
}

/// In-process window backed by an unbounded channel.
///
/// The receiver is the renderer's single registration: it sees every pushed
/// event in order until it is dropped.
pub struct ChannelWindow {
    tx: mpsc::UnboundedSender<WindowEvent>,
    destroyed: AtomicBool,
}

impl ChannelWindow {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<WindowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let window = Arc::new(Self {
            tx,
            destroyed: AtomicBool::new(false),
        });
        (window, rx)
    }

    /// Tear the window down. Later pushes are skipped.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

impl WindowHandle for ChannelWindow {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    fn emit(&self, channel: &str, payload: Value) {
        let _ = self.tx.send(WindowEvent {
            channel: channel.to_string(),
            payload,
        });
    }
}
