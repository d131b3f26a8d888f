use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Internal handle of one live socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Sending side of a registered connection.
///
/// Only the connection's own writer task touches the socket; everyone else
/// goes through this queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    pub connected_at: Instant,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(user_id: impl Into<String>, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id: user_id.into(),
            connected_at: Instant::now(),
            tx,
        }
    }

    /// Queue a text frame; false once the connection is gone
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx.send(Outbound::Text(text.into())).is_ok()
    }

    pub fn close(&self) -> bool {
        self.tx.send(Outbound::Close).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Concurrent index from user id to that user's open connections
pub trait ConnectionRegistry: Send + Sync {
    fn register(&self, handle: ConnectionHandle);

    fn unregister(&self, user_id: &str, id: ConnectionId) -> Option<ConnectionHandle>;

    /// Snapshot of a user's connections; empty for unknown users
    fn connections_for(&self, user_id: &str) -> Vec<ConnectionHandle>;

    /// Ask every connection to close
    fn close_all(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// DashMap-backed registry; per-user shards keep unrelated users apart
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    connections: DashMap<String, HashMap<ConnectionId, ConnectionHandle>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionRegistry for InMemoryRegistry {
    fn register(&self, handle: ConnectionHandle) {
        self.connections
            .entry(handle.user_id.clone())
            .or_default()
            .insert(handle.id, handle);
    }

    fn unregister(&self, user_id: &str, id: ConnectionId) -> Option<ConnectionHandle> {
        let removed = self
            .connections
            .get_mut(user_id)
            .and_then(|mut conns| conns.remove(&id));
        self.connections.remove_if(user_id, |_, conns| conns.is_empty());
        removed
    }

    fn connections_for(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.connections
            .get(user_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    fn close_all(&self) -> usize {
        let mut closed = 0;
        for conns in self.connections.iter() {
            for handle in conns.values() {
                if handle.close() {
                    closed += 1;
                }
            }
        }
        closed
    }

    fn len(&self) -> usize {
        self.connections.iter().map(|conns| conns.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(user_id: &str) -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(user_id, tx), rx)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = InMemoryRegistry::new();
        let (a1, _rx1) = handle("a");
        let (a2, _rx2) = handle("a");
        let (b1, _rx3) = handle("b");
        registry.register(a1);
        registry.register(a2);
        registry.register(b1);

        assert_eq!(registry.connections_for("a").len(), 2);
        assert_eq!(registry.connections_for("b").len(), 1);
        assert!(registry.connections_for("c").is_empty());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_unregister_drops_empty_users() {
        let registry = InMemoryRegistry::new();
        let (a1, _rx) = handle("a");
        let id = a1.id;
        registry.register(a1);

        assert!(registry.unregister("a", id).is_some());
        assert!(registry.unregister("a", id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_all_queues_close_frames() {
        let registry = InMemoryRegistry::new();
        let (a1, mut rx) = handle("a");
        registry.register(a1);

        assert_eq!(registry.close_all(), 1);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (a1, rx) = handle("a");
        drop(rx);
        assert!(!a1.send_text("hello"));
        assert!(a1.is_closed());
    }
}
