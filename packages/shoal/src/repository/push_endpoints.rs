use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use super::{PushEndpointStore, StoreError};
use crate::models::PushEndpoint;

/// Push subscriptions over SQLite.
#[derive(Clone)]
pub struct SqlitePushEndpointStore {
    pool: SqlitePool,
}

impl SqlitePushEndpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PushEndpointStore for SqlitePushEndpointStore {
    async fn upsert(&self, endpoint: &PushEndpoint) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO push_endpoints (user_id, endpoint, p256dh, auth, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, endpoint) DO UPDATE SET
                p256dh = excluded.p256dh,
                auth = excluded.auth,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&endpoint.user_id)
        .bind(&endpoint.endpoint)
        .bind(&endpoint.p256dh)
        .bind(&endpoint.auth)
        .bind(endpoint.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, user_id: &str, endpoint: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM push_endpoints WHERE user_id = ? AND endpoint = ?")
            .bind(user_id)
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_active(&self, user_id: &str) -> Result<Vec<PushEndpoint>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, endpoint, p256dh, auth, expires_at
            FROM push_endpoints
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(|r| PushEndpoint {
                user_id: r.get("user_id"),
                endpoint: r.get("endpoint"),
                p256dh: r.get("p256dh"),
                auth: r.get("auth"),
                expires_at: r.get::<Option<DateTime<Utc>>, _>("expires_at"),
            })
            .filter(|ep| !ep.is_expired(now))
            .collect())
    }
}
