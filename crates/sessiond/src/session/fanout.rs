//! Output fan-out from sessions to their transport.
//!
//! Each transport supplies an [`OutputFanout`] when it builds its registry.
//! The registry calls it from the session's pump thread for every output
//! chunk, and exactly once with the exit notification.

use protocol::ExitInfo;
use tokio::sync::mpsc;

/// Receives session output and exit notifications.
///
/// Implementations run on pump threads, so they must not block for long and
/// must not call back into the registry that owns them.
pub trait OutputFanout: Send + Sync + 'static {
    /// A chunk of decoded terminal output.
    fn data(&self, session_id: &str, chunk: &str);

    /// The session ended. Called once per session, after its last chunk.
    fn exit(&self, session_id: &str, exit: &ExitInfo);
}

/// An event emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Data { id: String, data: String },
    Exit { id: String, exit: ExitInfo },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Data { id, .. } | SessionEvent::Exit { id, .. } => id,
        }
    }
}

/// Fan-out into an unbounded channel.
///
/// Useful for in-process consumers and tests. Events are dropped silently
/// once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelFanout {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelFanout {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputFanout for ChannelFanout {
    fn data(&self, session_id: &str, chunk: &str) {
        let _ = self.tx.send(SessionEvent::Data {
            id: session_id.to_string(),
            data: chunk.to_string(),
        });
    }

    fn exit(&self, session_id: &str, exit: &ExitInfo) {
        let _ = self.tx.send(SessionEvent::Exit {
            id: session_id.to_string(),
            exit: exit.clone(),
        });
    }
}
