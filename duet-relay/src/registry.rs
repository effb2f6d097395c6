//! Connection registry: live connection identifier to outbound channel.
//!
//! Every accepted WebSocket gets an unbounded channel whose receiver is
//! drained by that socket's writer task. The registry holds the sender half
//! so any handler can reach any connection by identifier, independent of
//! room membership. Sends never wait for the peer, so they are safe to issue
//! while the room store's lock is held.

use std::collections::HashMap;

use axum::extract::ws::Message;
use duet_proto::codec;
use duet_proto::{ConnectionId, ServerMessage};
use parking_lot::RwLock;
use tokio::sync::{Notify, mpsc};

/// Sender half of a connection's outbound frame channel.
pub type Outbound = mpsc::UnboundedSender<Message>;

/// Maps live connection identifiers to their outbound channels.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Outbound>>,
    /// Signalled whenever an unregister leaves the registry empty.
    drained: Notify,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection, returning any sender previously stored under
    /// the same identifier.
    pub fn register(&self, conn_id: ConnectionId, sender: Outbound) -> Option<Outbound> {
        self.connections.write().insert(conn_id, sender)
    }

    /// Removes a connection, returning its sender if it was registered.
    pub fn unregister(&self, conn_id: ConnectionId) -> Option<Outbound> {
        let mut conns = self.connections.write();
        let removed = conns.remove(&conn_id);
        let now_empty = conns.is_empty();
        drop(conns);

        if now_empty {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Returns a clone of the sender for the given connection, if registered.
    pub fn get_sender(&self, conn_id: ConnectionId) -> Option<Outbound> {
        self.connections.read().get(&conn_id).cloned()
    }

    /// Whether the connection is currently registered.
    pub fn contains(&self, conn_id: ConnectionId) -> bool {
        self.connections.read().contains_key(&conn_id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Encodes `msg` and queues it on the connection's channel.
    ///
    /// Returns `false` if the connection is unknown, its writer has gone
    /// away, or the message could not be encoded. Never blocks on the peer.
    pub fn send(&self, conn_id: ConnectionId, msg: &ServerMessage) -> bool {
        let Some(sender) = self.get_sender(conn_id) else {
            return false;
        };
        match codec::encode_server(msg) {
            Ok(text) => sender.send(Message::Text(text.into())).is_ok(),
            Err(e) => {
                tracing::error!(conn_id = %conn_id, error = %e, "failed to encode outbound message");
                false
            }
        }
    }

    /// Queues a close frame on every registered connection.
    ///
    /// Each writer task forwards the frame and the client side observes a
    /// normal WebSocket close.
    pub fn close_all(&self) {
        let conns = self.connections.read();
        for (conn_id, sender) in conns.iter() {
            tracing::info!(conn_id = %conn_id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Resolves once no connections are registered.
    pub async fn wait_until_empty(&self) {
        loop {
            // Created before the check so an unregister in between is not missed.
            let drained = self.drained.notified();
            if self.is_empty() {
                return;
            }
            drained.await;
        }
    }
}
