//! Broadcast of session output to every connected WebSocket client.
//!
//! Each client registers an unbounded sender. Session `data` and `exit`
//! messages go to every client; replies to a request go only to the client
//! that asked, through the same sender, so per-client ordering holds.

use std::collections::HashMap;
use std::sync::RwLock;

use protocol::{ExitInfo, ServerMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::session::OutputFanout;

/// Unique identifier for a connected client.
pub type ClientId = Uuid;

/// The set of connected clients.
#[derive(Default)]
pub struct BroadcastFanout {
    clients: RwLock<HashMap<ClientId, mpsc::UnboundedSender<ServerMessage>>>,
}

impl BroadcastFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client and returns its id and outbound queue.
    pub fn register(&self) -> (ClientId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        tracing::debug!(client_id = %id, "Client registered");
        (id, rx)
    }

    pub fn unregister(&self, id: &ClientId) {
        if self
            .clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
        {
            tracing::debug!(client_id = %id, "Client unregistered");
        }
    }

    /// Sends a message to one client. Returns false if it is gone.
    pub fn send_to(&self, id: &ClientId, message: ServerMessage) -> bool {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        match clients.get(id) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Sends a message to every client, pruning closed ones.
    pub fn broadcast(&self, message: ServerMessage) {
        let mut closed = Vec::new();
        {
            let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
            for (id, tx) in clients.iter() {
                if tx.send(message.clone()).is_err() {
                    closed.push(*id);
                }
            }
        }

        if !closed.is_empty() {
            let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
            for id in closed {
                clients.remove(&id);
                tracing::debug!(client_id = %id, "Pruned closed client");
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl OutputFanout for BroadcastFanout {
    fn data(&self, session_id: &str, chunk: &str) {
        self.broadcast(ServerMessage::Data {
            id: session_id.to_string(),
            data: chunk.to_string(),
        });
    }

    fn exit(&self, session_id: &str, exit: &ExitInfo) {
        self.broadcast(ServerMessage::exit(session_id, exit));
    }
}
