//! Storage bootstrap: SQLite pool construction and schema creation.
//!
//! The engine keeps one record per item, one per source (counters only), a
//! legacy recommendation log consumed by the migration engine, and a small
//! key/value settings table holding the migration completion map.
//!
//! All connections carry a bounded busy timeout so no store operation can
//! block indefinitely; a timeout fails only the operation that hit it.

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Connect to the engine database, creating the file and schema if needed.
pub async fn connect(database_url: &str, busy_timeout: Duration) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;

    create_schema(&pool).await?;
    info!(database_url, "store ready");
    Ok(pool)
}

/// In-memory pool with full schema. Used by tests and ad-hoc tooling.
pub async fn memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes. Idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            link TEXT NOT NULL UNIQUE,
            title TEXT,
            published_at TEXT,
            fetched_at TEXT NOT NULL,
            in_source INTEGER NOT NULL DEFAULT 1,
            pool_status TEXT,
            score REAL,
            candidate_entered_at TEXT,
            recommended_entered_at TEXT,
            exited_at TEXT,
            exit_reason TEXT,
            read INTEGER NOT NULL DEFAULT 0,
            disliked INTEGER NOT NULL DEFAULT 0,
            starred INTEGER NOT NULL DEFAULT 0,
            legacy_recommended INTEGER,
            legacy_in_pool INTEGER,
            legacy_pool_added_at TEXT,
            legacy_pool_removed_at TEXT,
            legacy_pool_removed_reason TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_source ON items(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_status ON items(pool_status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            name TEXT,
            total_items INTEGER NOT NULL DEFAULT 0,
            in_source_items INTEGER NOT NULL DEFAULT 0,
            analyzed_items INTEGER NOT NULL DEFAULT 0,
            raw_count INTEGER NOT NULL DEFAULT 0,
            prescreened_out_count INTEGER NOT NULL DEFAULT 0,
            stale_count INTEGER NOT NULL DEFAULT 0,
            analyzed_not_qualified_count INTEGER NOT NULL DEFAULT 0,
            candidate_count INTEGER NOT NULL DEFAULT 0,
            recommended_count INTEGER NOT NULL DEFAULT 0,
            exited_count INTEGER NOT NULL DEFAULT 0,
            ever_recommended INTEGER NOT NULL DEFAULT 0,
            ever_read INTEGER NOT NULL DEFAULT 0,
            ever_disliked INTEGER NOT NULL DEFAULT 0,
            worst_performer INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS legacy_recommendation_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            link TEXT NOT NULL,
            status TEXT,
            feedback TEXT,
            created_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_legacy_log_link ON legacy_recommendation_log(link)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
