//! Server metrics for observability
//!
//! Provides runtime metrics for monitoring server health and performance.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// Handshakes rejected before a session existed (bad token / bad room)
    pub handshake_rejections: AtomicU64,

    // Message metrics
    /// Frames received from clients
    pub messages_received: AtomicU64,
    /// Messages written to client transports
    pub messages_sent: AtomicU64,

    // Routing metrics
    /// Room broadcasts performed
    pub room_broadcasts: AtomicU64,
    /// Direct messages routed
    pub direct_messages: AtomicU64,
    /// Notifications dispatched (persisted)
    pub notifications_dispatched: AtomicU64,

    // Push metrics
    /// Push deliveries accepted by the push service
    pub pushes_sent: AtomicU64,
    /// Push deliveries that failed (other than retirement)
    pub pushes_failed: AtomicU64,
    /// Push endpoints retired after the service reported them gone
    pub push_endpoints_retired: AtomicU64,

    // Error metrics
    /// WebSocket transport errors
    pub websocket_errors: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn handshake_rejected(&self) {
        self.handshake_rejections.fetch_add(1, Ordering::Relaxed);
    }

    // Message tracking
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    // Routing
    pub fn room_broadcast(&self) {
        self.room_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn direct_message(&self) {
        self.direct_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_dispatched(&self) {
        self.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    // Push
    pub fn push_sent(&self) {
        self.pushes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_failed(&self) {
        self.pushes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_endpoint_retired(&self) {
        self.push_endpoints_retired.fetch_add(1, Ordering::Relaxed);
    }

    // Errors
    pub fn websocket_error(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                handshake_rejections: self.handshake_rejections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                sent: self.messages_sent.load(Ordering::Relaxed),
            },
            routing: RoutingMetrics {
                room_broadcasts: self.room_broadcasts.load(Ordering::Relaxed),
                direct_messages: self.direct_messages.load(Ordering::Relaxed),
                notifications_dispatched: self.notifications_dispatched.load(Ordering::Relaxed),
            },
            push: PushMetrics {
                sent: self.pushes_sent.load(Ordering::Relaxed),
                failed: self.pushes_failed.load(Ordering::Relaxed),
                endpoints_retired: self.push_endpoints_retired.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                websocket: self.websocket_errors.load(Ordering::Relaxed),
            },
        }
    }

    pub fn health(&self, channels: u64) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            connections: self.active_connections.load(Ordering::Relaxed),
            channels,
            uptime_secs: self.uptime_secs(),
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub routing: RoutingMetrics,
    pub push: PushMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub handshake_rejections: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub sent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingMetrics {
    pub room_broadcasts: u64,
    pub direct_messages: u64,
    pub notifications_dispatched: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMetrics {
    pub sent: u64,
    pub failed: u64,
    pub endpoints_retired: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub websocket: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    /// Channel keys with at least one registered handle.
    pub channels: u64,
    pub uptime_secs: u64,
}
