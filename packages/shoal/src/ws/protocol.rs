//! Wire protocol for the chat and notification channels.
//!
//! Inbound frames are UTF-8 text: either the literal heartbeat sentinel or
//! a JSON payload whose shape depends on the channel the connection was
//! opened on. Outbound traffic is one tagged enum so every component
//! serializes the same way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Application-level keep-alive payload. Consumed by the session, never
/// handed to a router.
pub const HEARTBEAT_SENTINEL: &str = "ping";

/// Inbound payload on a room channel.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomFrame {
    pub text: String,
    /// Client-assigned display name; advisory only, the authoritative
    /// sender identity comes from the session's verified subject.
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Inbound payload on a direct-message channel.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectFrame {
    /// Recipient user id.
    pub to: String,
    pub text: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Messages sent from the server to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Room membership notice ("alice joined").
    System {
        room_id: i64,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// An ordinary room chat message.
    Chat {
        message_id: Uuid,
        room_id: i64,
        sender_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// A one-to-one direct message.
    Direct {
        message_id: Uuid,
        sender_id: String,
        recipient_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// An asynchronous notification delivered over the notification channel.
    Notification {
        id: i64,
        title: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Reply to the heartbeat sentinel.
    Pong,
}
