use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use super::{NotificationStore, StoreError};
use crate::models::NotificationRecord;

/// Notification records over SQLite.
#[derive(Clone)]
pub struct SqliteNotificationStore {
    pool: SqlitePool,
}

impl SqliteNotificationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn create(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        url: Option<&str>,
    ) -> Result<NotificationRecord, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (user_id, title, body, url, is_read, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(user_id)
        .bind(title)
        .bind(body)
        .bind(url)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(NotificationRecord {
            id: result.last_insert_rowid(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            url: url.map(str::to_string),
            is_read: false,
            created_at,
        })
    }

    async fn list_unread(&self, user_id: &str) -> Result<Vec<NotificationRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, body, url, is_read, created_at
            FROM notifications
            WHERE user_id = ? AND is_read = 0
            ORDER BY id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| NotificationRecord {
                id: r.get("id"),
                user_id: r.get("user_id"),
                title: r.get("title"),
                body: r.get("body"),
                url: r.get("url"),
                is_read: r.get::<i64, _>("is_read") != 0,
                created_at: r.get::<DateTime<Utc>, _>("created_at"),
            })
            .collect())
    }

    async fn mark_read(&self, id: i64, user_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
