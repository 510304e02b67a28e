//! In-memory SQLite pools for store tests.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// A fresh in-memory database with the full schema applied. One connection
/// only: every connection to `sqlite::memory:` is its own database.
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite pool");
    crate::db::run_migrations(&pool)
        .await
        .expect("migrations on in-memory pool");
    pool
}
