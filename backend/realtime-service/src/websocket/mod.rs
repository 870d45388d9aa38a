//! WebSocket connection registry
//!
//! Tracks the live connection for each identity and which chat sessions
//! that identity is attached to. One process instance owns the registry;
//! cross-instance fan-out belongs to an external broker.
//!
//! Mutations are serialized per key by the sharded map, never behind a
//! single registry-wide lock; sends go through unbounded channels so no
//! shard lock is ever held across network I/O.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub mod messages;
pub mod route;

pub use messages::{WsClientEvent, WsEvent};

/// Type alias for the transport handle side of a connection
pub type WsSender = UnboundedSender<WsEvent>;

/// Live connection state for one identity
struct ConnectionHandle {
    /// Distinguishes this connection from a successor under the same
    /// identity, for precise cleanup
    connection_id: Uuid,
    sender: WsSender,
    connected_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    /// Sessions this connection joined, for membership cleanup
    sessions: HashSet<Uuid>,
}

/// Connection registry
///
/// Last-connection-wins per identity: registering over an existing
/// connection evicts the old one. Session membership is tracked so
/// broadcasts can target only the participants that are actually online.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<Uuid, ConnectionHandle>>,
    sessions: Arc<DashMap<Uuid, HashSet<Uuid>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the live connection for an identity.
    ///
    /// Any prior connection under the same identity receives a best-effort
    /// eviction frame and is dropped (last-connection-wins). Returns a
    /// connection id for precise cleanup via `unregister_connection`.
    pub fn register(&self, identity: Uuid, sender: WsSender) -> Uuid {
        let now = Utc::now();
        let connection_id = Uuid::new_v4();
        let handle = ConnectionHandle {
            connection_id,
            sender,
            connected_at: now,
            last_seen: now,
            sessions: HashSet::new(),
        };

        if let Some(previous) = self.connections.insert(identity, handle) {
            let _ = previous.sender.send(WsEvent::evicted());
            for session_id in &previous.sessions {
                self.detach_from_session(*session_id, identity);
            }
            tracing::debug!("Replaced existing connection for {}", identity);
        }

        tracing::debug!(
            "Registered connection for {}, total connections: {}",
            identity,
            self.connections.len()
        );
        connection_id
    }

    /// Remove the connection for an identity. Idempotent.
    pub fn unregister(&self, identity: Uuid) {
        if let Some((_, handle)) = self.connections.remove(&identity) {
            for session_id in &handle.sessions {
                self.detach_from_session(*session_id, identity);
            }
            tracing::debug!(
                "Unregistered connection for {}, total connections: {}",
                identity,
                self.connections.len()
            );
        }
    }

    /// Remove the connection only if it is still the one identified by
    /// `connection_id`; a connection that was already replaced must not
    /// tear down its successor on the way out.
    pub fn unregister_connection(&self, identity: Uuid, connection_id: Uuid) {
        let is_current = self
            .connections
            .get(&identity)
            .map(|h| h.connection_id == connection_id)
            .unwrap_or(false);
        if is_current {
            self.unregister(identity);
        }
    }

    /// Attach a connected identity to a session's broadcast scope
    pub fn join_session(&self, session_id: Uuid, identity: Uuid) {
        if let Some(mut handle) = self.connections.get_mut(&identity) {
            handle.sessions.insert(session_id);
        } else {
            return;
        }
        self.sessions.entry(session_id).or_default().insert(identity);
    }

    /// Detach an identity from a session's broadcast scope
    pub fn leave_session(&self, session_id: Uuid, identity: Uuid) {
        if let Some(mut handle) = self.connections.get_mut(&identity) {
            handle.sessions.remove(&session_id);
        }
        self.detach_from_session(session_id, identity);
    }

    fn detach_from_session(&self, session_id: Uuid, identity: Uuid) {
        let mut drop_entry = false;
        if let Some(mut members) = self.sessions.get_mut(&session_id) {
            members.remove(&identity);
            drop_entry = members.is_empty();
        }
        // Clean up empty session entries
        if drop_entry {
            self.sessions
                .remove_if(&session_id, |_, members| members.is_empty());
        }
    }

    /// Hand an event to an identity's live connection.
    ///
    /// Best-effort, fire-and-forget: true means the event reached the
    /// transport channel, not the remote client. A dead channel evicts the
    /// connection.
    pub fn send(&self, identity: Uuid, event: WsEvent) -> bool {
        let ok = match self.connections.get(&identity) {
            Some(handle) => handle.sender.send(event).is_ok(),
            None => false,
        };
        if !ok && self.connections.contains_key(&identity) {
            tracing::debug!("Dropping dead connection for {}", identity);
            self.unregister(identity);
        }
        ok
    }

    /// Broadcast an event to every connected member of a session, except
    /// the excluded identity (no echo to senders).
    ///
    /// A transport failure on one connection evicts that connection and
    /// the broadcast continues; it never aborts. Returns the identities
    /// the event was handed to.
    pub fn broadcast(&self, session_id: Uuid, event: WsEvent, exclude: Option<Uuid>) -> Vec<Uuid> {
        let members: Vec<Uuid> = match self.sessions.get(&session_id) {
            Some(members) => members.iter().copied().collect(),
            None => return Vec::new(),
        };

        let mut delivered = Vec::with_capacity(members.len());
        for identity in members {
            if Some(identity) == exclude {
                continue;
            }
            if self.send(identity, event.clone()) {
                delivered.push(identity);
            }
        }
        delivered
    }

    /// Record inbound activity for liveness tracking
    pub fn touch(&self, identity: Uuid) {
        if let Some(mut handle) = self.connections.get_mut(&identity) {
            handle.last_seen = Utc::now();
        }
    }

    /// Evict connections silent for longer than `max_idle`.
    ///
    /// Returns the number of evicted connections.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let idle: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|entry| entry.last_seen < cutoff)
            .map(|entry| *entry.key())
            .collect();

        for identity in &idle {
            self.unregister(*identity);
        }
        if !idle.is_empty() {
            tracing::info!("Evicted {} idle connections", idle.len());
        }
        idle.len()
    }

    pub fn is_online(&self, identity: Uuid) -> bool {
        self.connections.contains_key(&identity)
    }

    pub fn connected_since(&self, identity: Uuid) -> Option<DateTime<Utc>> {
        self.connections.get(&identity).map(|h| h.connected_at)
    }

    /// Total live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connected members of one session
    pub fn session_member_count(&self, session_id: Uuid) -> usize {
        self.sessions
            .get(&session_id)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// All connected identities
    pub fn connected_identities(&self) -> Vec<Uuid> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Drop every connection; used on shutdown
    pub fn clear(&self) {
        self.connections.clear();
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn channel() -> (WsSender, tokio::sync::mpsc::UnboundedReceiver<WsEvent>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_register_and_count() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.connection_count(), 0);

        let identity = Uuid::new_v4();
        let (tx, _rx) = channel();
        registry.register(identity, tx);

        assert_eq!(registry.connection_count(), 1);
        assert!(registry.is_online(identity));
    }

    #[tokio::test]
    async fn test_last_connection_wins() {
        let registry = ConnectionRegistry::new();
        let identity = Uuid::new_v4();

        let (tx1, mut rx1) = channel();
        registry.register(identity, tx1);

        let (tx2, mut rx2) = channel();
        registry.register(identity, tx2);

        // Old connection got the eviction frame
        let evicted = rx1.recv().await;
        assert!(matches!(evicted, Some(WsEvent::Evicted { .. })));

        // Still one connection; events go to the new channel
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.send(identity, WsEvent::connected(identity)));
        assert!(matches!(rx2.recv().await, Some(WsEvent::Connected { .. })));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let identity = Uuid::new_v4();
        let (tx, _rx) = channel();

        registry.register(identity, tx);
        registry.unregister(identity);
        registry.unregister(identity);

        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.is_online(identity));
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let registry = ConnectionRegistry::new();
        let delivered = registry.send(Uuid::new_v4(), WsEvent::evicted());
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = ConnectionRegistry::new();
        let session_id = Uuid::new_v4();
        let sender_id = Uuid::new_v4();
        let other_id = Uuid::new_v4();

        let (tx1, mut rx1) = channel();
        registry.register(sender_id, tx1);
        registry.join_session(session_id, sender_id);

        let (tx2, mut rx2) = channel();
        registry.register(other_id, tx2);
        registry.join_session(session_id, other_id);

        let event = WsEvent::message_new(Uuid::new_v4(), session_id, sender_id, "hello");
        let delivered = registry.broadcast(session_id, event, Some(sender_id));

        assert_eq!(delivered, vec![other_id]);
        assert!(matches!(rx2.recv().await, Some(WsEvent::MessageNew { .. })));
        // No echo for the sender
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_survives_dead_connection() {
        let registry = ConnectionRegistry::new();
        let session_id = Uuid::new_v4();

        let dead = Uuid::new_v4();
        let (tx_dead, rx_dead) = channel();
        registry.register(dead, tx_dead);
        registry.join_session(session_id, dead);
        drop(rx_dead); // transport gone

        let mut live_rx = Vec::new();
        for _ in 0..3 {
            let identity = Uuid::new_v4();
            let (tx, rx) = channel();
            registry.register(identity, tx);
            registry.join_session(session_id, identity);
            live_rx.push(rx);
        }

        let event = WsEvent::message_new(Uuid::new_v4(), session_id, Uuid::new_v4(), "hi");
        let delivered = registry.broadcast(session_id, event, None);

        // The dead connection is isolated and evicted; the rest deliver
        assert_eq!(delivered.len(), 3);
        assert!(!registry.is_online(dead));
        for mut rx in live_rx {
            assert!(matches!(rx.recv().await, Some(WsEvent::MessageNew { .. })));
        }
    }

    #[tokio::test]
    async fn test_session_membership_cleanup_on_unregister() {
        let registry = ConnectionRegistry::new();
        let session_id = Uuid::new_v4();
        let identity = Uuid::new_v4();

        let (tx, _rx) = channel();
        registry.register(identity, tx);
        registry.join_session(session_id, identity);
        assert_eq!(registry.session_member_count(session_id), 1);

        registry.unregister(identity);
        assert_eq!(registry.session_member_count(session_id), 0);
    }

    #[tokio::test]
    async fn test_join_session_requires_connection() {
        let registry = ConnectionRegistry::new();
        let session_id = Uuid::new_v4();

        registry.join_session(session_id, Uuid::new_v4());
        assert_eq!(registry.session_member_count(session_id), 0);
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let registry = ConnectionRegistry::new();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        let (tx1, _rx1) = channel();
        registry.register(stale, tx1);
        // Backdate the stale connection
        if let Some(mut handle) = registry.connections.get_mut(&stale) {
            handle.last_seen = Utc::now() - Duration::seconds(600);
        }

        let (tx2, _rx2) = channel();
        registry.register(fresh, tx2);

        let evicted = registry.evict_idle(Duration::seconds(300));
        assert_eq!(evicted, 1);
        assert!(!registry.is_online(stale));
        assert!(registry.is_online(fresh));
    }

    #[tokio::test]
    async fn test_touch_refreshes_liveness() {
        let registry = ConnectionRegistry::new();
        let identity = Uuid::new_v4();

        let (tx, _rx) = channel();
        registry.register(identity, tx);
        if let Some(mut handle) = registry.connections.get_mut(&identity) {
            handle.last_seen = Utc::now() - Duration::seconds(600);
        }
        registry.touch(identity);

        assert_eq!(registry.evict_idle(Duration::seconds(300)), 0);
        assert!(registry.is_online(identity));
    }

    #[tokio::test]
    async fn test_stale_unregister_does_not_remove_successor() {
        let registry = ConnectionRegistry::new();
        let identity = Uuid::new_v4();

        let (tx1, _rx1) = channel();
        let first = registry.register(identity, tx1);

        let (tx2, _rx2) = channel();
        let second = registry.register(identity, tx2);

        // The replaced connection cleaning up after itself is a no-op
        registry.unregister_connection(identity, first);
        assert!(registry.is_online(identity));

        registry.unregister_connection(identity, second);
        assert!(!registry.is_online(identity));
    }

    #[tokio::test]
    async fn test_clear() {
        let registry = ConnectionRegistry::new();
        for _ in 0..3 {
            let (tx, _rx) = channel();
            registry.register(Uuid::new_v4(), tx);
        }
        assert_eq!(registry.connection_count(), 3);

        registry.clear();
        assert_eq!(registry.connection_count(), 0);
    }
}
