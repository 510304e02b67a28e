//! Connection registry: the ownership map from channel keys to live
//! connection handles.
//!
//! This is the only state shared across session tasks. The map is sharded
//! (dashmap) so unrelated rooms and users do not serialize against each
//! other; within one key, registration, unregistration, and snapshots are
//! mutually exclusive.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::ServerMessage;

/// Addressing unit for the registry: a chat room or a single user's
/// direct-message or notification sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Room(i64),
    Direct(String),
    Notify(String),
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::Room(id) => write!(f, "room:{id}"),
            ChannelKey::Direct(user) => write!(f, "direct:{user}"),
            ChannelKey::Notify(user) => write!(f, "notify:{user}"),
        }
    }
}

/// Send-capable endpoint bound to one connected client's transport.
///
/// Owned by the registry once registered; the session task keeps a
/// non-owning clone for the duration of its read loop.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: Uuid,
    tx: mpsc::Sender<Arc<String>>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end its session drains into the
    /// transport.
    pub fn new(buffer: usize) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Arc::new(Self {
                id: Uuid::new_v4(),
                tx,
            }),
            rx,
        )
    }

    /// Queue a serialized message without blocking. Returns false when the
    /// transport side is gone or the outbound buffer is full; callers treat
    /// either as a dead peer.
    pub fn send(&self, json: Arc<String>) -> bool {
        self.tx.try_send(json).is_ok()
    }

    /// True once the session's receiving half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Shared map of live connections, keyed by channel.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    channels: DashMap<ChannelKey, HashMap<Uuid, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle under a key. Multiple handles per key are normal
    /// (several devices/tabs); re-registering the same handle id is a no-op.
    pub fn register(&self, key: ChannelKey, handle: Arc<ConnectionHandle>) {
        self.channels
            .entry(key)
            .or_default()
            .insert(handle.id, handle);
    }

    /// Remove a handle. The key entry is dropped once its set is empty so
    /// idle keys do not accumulate.
    pub fn unregister(&self, key: &ChannelKey, id: Uuid) {
        if let Entry::Occupied(mut entry) = self.channels.entry(key.clone()) {
            entry.get_mut().remove(&id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Current live handles for a key. Handles whose transport is already
    /// observably closed are pruned from the map, not returned. Callers use
    /// the result immediately; it is never cached.
    pub fn snapshot(&self, key: &ChannelKey) -> Vec<Arc<ConnectionHandle>> {
        match self.channels.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().retain(|_, handle| !handle.is_closed());
                if entry.get().is_empty() {
                    entry.remove();
                    Vec::new()
                } else {
                    entry.get().values().cloned().collect()
                }
            }
            Entry::Vacant(_) => Vec::new(),
        }
    }

    /// Serialize once and attempt delivery to every live handle under the
    /// key. A failed send unregisters that handle and never affects the
    /// remaining ones. Returns the number of accepted sends; zero recipients
    /// is a silent no-op.
    pub fn fan_out(&self, key: &ChannelKey, message: &ServerMessage) -> usize {
        let handles = self.snapshot(key);
        if handles.is_empty() {
            return 0;
        }
        let json = match serde_json::to_string(message) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(channel = %key, error = %e, "failed to serialize outbound message");
                return 0;
            }
        };
        let mut delivered = 0;
        for handle in &handles {
            if handle.send(Arc::clone(&json)) {
                delivered += 1;
            } else {
                debug!(channel = %key, conn_id = %handle.id, "dropping dead connection during fan-out");
                self.unregister(key, handle.id);
            }
        }
        delivered
    }

    /// Number of keys with at least one registered handle.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_message() -> ServerMessage {
        ServerMessage::System {
            room_id: 1,
            message: "hello".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn register_and_snapshot() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(1), Arc::clone(&handle));

        let snapshot = registry.snapshot(&ChannelKey::Room(1));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, handle.id);
    }

    #[test]
    fn multiple_handles_per_key() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = ConnectionHandle::new(8);
        let (b, _rx_b) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Direct("u7".into()), a);
        registry.register(ChannelKey::Direct("u7".into()), b);

        assert_eq!(registry.snapshot(&ChannelKey::Direct("u7".into())).len(), 2);
    }

    #[test]
    fn duplicate_registration_is_noop() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(1), Arc::clone(&handle));
        registry.register(ChannelKey::Room(1), Arc::clone(&handle));

        assert_eq!(registry.snapshot(&ChannelKey::Room(1)).len(), 1);
    }

    #[test]
    fn unregister_drops_empty_key() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(1), Arc::clone(&handle));
        assert_eq!(registry.channel_count(), 1);

        registry.unregister(&ChannelKey::Room(1), handle.id);
        assert_eq!(registry.channel_count(), 0);
        assert!(registry.snapshot(&ChannelKey::Room(1)).is_empty());
    }

    #[test]
    fn unregister_keeps_key_with_remaining_handles() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = ConnectionHandle::new(8);
        let (b, _rx_b) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(1), Arc::clone(&a));
        registry.register(ChannelKey::Room(1), Arc::clone(&b));

        registry.unregister(&ChannelKey::Room(1), a.id);
        let snapshot = registry.snapshot(&ChannelKey::Room(1));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, b.id);
    }

    #[test]
    fn snapshot_never_returns_unregistered_handle() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = ConnectionHandle::new(8);
        let (b, _rx_b) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(1), Arc::clone(&a));
        registry.register(ChannelKey::Room(1), Arc::clone(&b));
        registry.unregister(&ChannelKey::Room(1), a.id);

        let snapshot = registry.snapshot(&ChannelKey::Room(1));
        assert!(snapshot.iter().all(|h| h.id != a.id));
    }

    #[test]
    fn snapshot_prunes_closed_handles() {
        let registry = ConnectionRegistry::new();
        let (open, _rx_open) = ConnectionHandle::new(8);
        let (closed, rx_closed) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(1), Arc::clone(&open));
        registry.register(ChannelKey::Room(1), Arc::clone(&closed));

        drop(rx_closed);
        let snapshot = registry.snapshot(&ChannelKey::Room(1));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, open.id);
    }

    #[test]
    fn snapshot_drops_key_when_all_closed() {
        let registry = ConnectionRegistry::new();
        let (handle, rx) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Notify("u7".into()), handle);
        drop(rx);

        assert!(registry.snapshot(&ChannelKey::Notify("u7".into())).is_empty());
        assert_eq!(registry.channel_count(), 0);
    }

    #[tokio::test]
    async fn fan_out_reaches_every_live_handle() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = ConnectionHandle::new(8);
        let (b, mut rx_b) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(1), a);
        registry.register(ChannelKey::Room(1), b);

        let delivered = registry.fan_out(&ChannelKey::Room(1), &test_message());
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn fan_out_failure_does_not_block_others() {
        let registry = ConnectionRegistry::new();
        // Buffer of 1, pre-filled: the next send fails.
        let (stuck, _rx_stuck) = ConnectionHandle::new(1);
        assert!(stuck.send(Arc::new("filler".into())));
        let (healthy, mut rx_healthy) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(1), Arc::clone(&stuck));
        registry.register(ChannelKey::Room(1), healthy);

        let delivered = registry.fan_out(&ChannelKey::Room(1), &test_message());
        assert_eq!(delivered, 1);
        assert!(rx_healthy.try_recv().is_ok());
        // The stuck handle was unregistered.
        let snapshot = registry.snapshot(&ChannelKey::Room(1));
        assert!(snapshot.iter().all(|h| h.id != stuck.id));
    }

    #[tokio::test]
    async fn fan_out_to_empty_key_is_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.fan_out(&ChannelKey::Room(99), &test_message()), 0);
    }

    #[tokio::test]
    async fn fan_out_shares_one_serialization() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = ConnectionHandle::new(8);
        let (b, mut rx_b) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(1), a);
        registry.register(ChannelKey::Room(1), b);

        registry.fan_out(&ChannelKey::Room(1), &test_message());
        let msg_a = rx_a.try_recv().unwrap();
        let msg_b = rx_b.try_recv().unwrap();
        assert!(Arc::ptr_eq(&msg_a, &msg_b));
    }

    #[test]
    fn concurrent_access_from_many_tasks() {
        // Register/unregister/snapshot across threads must not deadlock or
        // lose unrelated entries.
        let registry = Arc::new(ConnectionRegistry::new());
        let mut threads = Vec::new();
        for room in 0..8i64 {
            let registry = Arc::clone(&registry);
            threads.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let (handle, _rx) = ConnectionHandle::new(4);
                    let id = handle.id;
                    registry.register(ChannelKey::Room(room), handle);
                    let _ = registry.snapshot(&ChannelKey::Room(room));
                    registry.unregister(&ChannelKey::Room(room), id);
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(registry.channel_count(), 0);
    }
}
