//! Room broadcast routing.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::metrics::ServerMetrics;

use super::protocol::{RoomFrame, ServerMessage};
use super::registry::{ChannelKey, ConnectionRegistry};

/// Fans room traffic out to every live session registered under the room.
///
/// Partial failures stay inside the registry (dead handles are pruned as a
/// side effect of the fan-out); callers never see them.
pub struct RoomRouter {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl RoomRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<ServerMetrics>) -> Self {
        Self { registry, metrics }
    }

    /// Stamp and broadcast a chat message. Returns the number of sessions
    /// it reached; an empty room is a normal occurrence, not an error.
    pub fn broadcast_chat(&self, room_id: i64, sender_id: &str, frame: RoomFrame) -> usize {
        let message = ServerMessage::Chat {
            message_id: Uuid::new_v4(),
            room_id,
            sender_id: sender_id.to_string(),
            sender_name: frame.sender_name,
            avatar: frame.avatar,
            text: frame.text,
            timestamp: Utc::now(),
        };
        let delivered = self.registry.fan_out(&ChannelKey::Room(room_id), &message);
        self.metrics.room_broadcast();
        debug!(room = room_id, sender = %sender_id, delivered, "room broadcast");
        delivered
    }

    /// Best-effort membership notice ("alice joined" / "alice left").
    pub fn notice(&self, room_id: i64, message: String) {
        let notice = ServerMessage::System {
            room_id,
            message,
            timestamp: Utc::now(),
        };
        let _ = self.registry.fan_out(&ChannelKey::Room(room_id), &notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::registry::ConnectionHandle;

    fn router() -> (RoomRouter, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(ServerMetrics::new());
        (RoomRouter::new(Arc::clone(&registry), metrics), registry)
    }

    fn frame(text: &str) -> RoomFrame {
        RoomFrame {
            text: text.into(),
            sender_name: None,
            avatar: None,
        }
    }

    fn received_text(raw: &Arc<String>) -> serde_json::Value {
        serde_json::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn broadcast_reaches_all_room_members() {
        let (router, registry) = router();
        let (a, mut rx_a) = ConnectionHandle::new(8);
        let (b, mut rx_b) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(42), a);
        registry.register(ChannelKey::Room(42), b);

        let delivered = router.broadcast_chat(42, "u7", frame("hi"));
        assert_eq!(delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let json = received_text(&rx.try_recv().unwrap());
            assert_eq!(json["type"], "chat");
            assert_eq!(json["text"], "hi");
            assert_eq!(json["sender_id"], "u7");
            assert!(json["message_id"].is_string());
        }
    }

    #[tokio::test]
    async fn broadcast_does_not_cross_rooms() {
        let (router, registry) = router();
        let (a, mut rx_a) = ConnectionHandle::new(8);
        let (other, mut rx_other) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(42), a);
        registry.register(ChannelKey::Room(43), other);

        router.broadcast_chat(42, "u7", frame("hi"));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_empty_room_is_silent_noop() {
        let (router, _registry) = router();
        assert_eq!(router.broadcast_chat(42, "u7", frame("hi")), 0);
    }

    #[tokio::test]
    async fn closed_member_is_pruned_and_skipped() {
        let (router, registry) = router();
        let (a, rx_a) = ConnectionHandle::new(8);
        let (b, mut rx_b) = ConnectionHandle::new(8);
        let a_id = a.id;
        registry.register(ChannelKey::Room(42), a);
        registry.register(ChannelKey::Room(42), b);

        // First broadcast reaches both.
        assert_eq!(router.broadcast_chat(42, "u7", frame("hi")), 2);
        // A's transport closes out from under the registry.
        drop(rx_a);

        let delivered = router.broadcast_chat(42, "u7", frame("again"));
        assert_eq!(delivered, 1);
        // B got both messages.
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        // A no longer appears in a snapshot.
        let snapshot = registry.snapshot(&ChannelKey::Room(42));
        assert!(snapshot.iter().all(|h| h.id != a_id));
    }

    #[tokio::test]
    async fn one_full_buffer_does_not_block_the_rest() {
        let (router, registry) = router();
        let (stuck, _rx_stuck) = ConnectionHandle::new(1);
        assert!(stuck.send(Arc::new("filler".into())));
        let (healthy, mut rx_healthy) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(42), stuck);
        registry.register(ChannelKey::Room(42), healthy);

        let delivered = router.broadcast_chat(42, "u7", frame("hi"));
        assert_eq!(delivered, 1);
        let json = received_text(&rx_healthy.try_recv().unwrap());
        assert_eq!(json["text"], "hi");
    }

    #[tokio::test]
    async fn notice_is_a_system_message() {
        let (router, registry) = router();
        let (a, mut rx_a) = ConnectionHandle::new(8);
        registry.register(ChannelKey::Room(42), a);

        router.notice(42, "u7 joined".into());
        let json = received_text(&rx_a.try_recv().unwrap());
        assert_eq!(json["type"], "system");
        assert_eq!(json["message"], "u7 joined");
        assert_eq!(json["room_id"], 42);
    }
}
