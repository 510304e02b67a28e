//! Persistent data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A direct message as durably stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Server-assigned message id, stamped at routing time.
    pub id: Uuid,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A notification as durably stored. Created unread by the dispatcher;
/// the read flag is only ever flipped by the read-receipt endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// A browser/OS push subscription on file for a user.
///
/// Deleted when the push service reports it permanently gone, or ignored
/// once its expiry timestamp has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEndpoint {
    pub user_id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PushEndpoint {
    /// True when the subscription's own expiry timestamp has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
