//! Store contracts and their SQLite implementations.
//!
//! The traits are the collaborator seams the routing components depend on;
//! the `Sqlite*` types implement them over one shared pool. Tests exercise
//! routers against in-memory fakes and the implementations against an
//! in-memory database.

mod messages;
mod notifications;
mod push_endpoints;
#[cfg(test)]
pub(crate) mod test_helpers;

pub use messages::SqliteMessageStore;
pub use notifications::SqliteNotificationStore;
pub use push_endpoints::SqlitePushEndpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{NotificationRecord, PushEndpoint};

/// Persistence failure surfaced by any store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("no such record")]
    NotFound,
}

/// Durable direct-message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one routed direct message.
    async fn append(
        &self,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
        timestamp: DateTime<Utc>,
        message_id: Uuid,
    ) -> Result<(), StoreError>;
}

/// Durable notification records.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Create an unread record and return it with its assigned id.
    async fn create(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        url: Option<&str>,
    ) -> Result<NotificationRecord, StoreError>;

    async fn list_unread(&self, user_id: &str) -> Result<Vec<NotificationRecord>, StoreError>;

    async fn mark_read(&self, id: i64, user_id: &str) -> Result<(), StoreError>;

    async fn mark_all_read(&self, user_id: &str) -> Result<(), StoreError>;
}

/// Push subscriptions on file per user.
#[async_trait]
pub trait PushEndpointStore: Send + Sync {
    async fn upsert(&self, endpoint: &PushEndpoint) -> Result<(), StoreError>;

    async fn delete(&self, user_id: &str, endpoint: &str) -> Result<(), StoreError>;

    /// Endpoints whose expiry timestamp has not passed.
    async fn list_active(&self, user_id: &str) -> Result<Vec<PushEndpoint>, StoreError>;
}
