use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use super::{MessageStore, StoreError};
use crate::models::StoredMessage;

/// Direct-message log over SQLite.
#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(
        &self,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
        timestamp: DateTime<Utc>,
        message_id: Uuid,
    ) -> Result<(), StoreError> {
        let message = StoredMessage {
            id: message_id,
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            body: body.to_string(),
            created_at: timestamp,
        };
        sqlx::query(
            r#"
            INSERT INTO messages (id, sender_id, recipient_id, body, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.id.to_string())
        .bind(&message.sender_id)
        .bind(&message.recipient_id)
        .bind(&message.body)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
