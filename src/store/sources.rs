//! Source record accessors (reads + registration).
//!
//! Counter writes live in `stats`; this module never patches counters.

use crate::error::Result;
use crate::model::SourceCounters;
use sqlx::SqlitePool;

/// Register a source if it is not on file yet. Counters start at zero and
/// are only ever written by `stats::recompute`.
pub async fn ensure(pool: &SqlitePool, source_id: &str, name: Option<&str>) -> Result<()> {
    sqlx::query("INSERT INTO sources (id, name) VALUES (?, ?) ON CONFLICT(id) DO NOTHING")
        .bind(source_id)
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_counters(pool: &SqlitePool, source_id: &str) -> Result<Option<SourceCounters>> {
    let counters = sqlx::query_as("SELECT * FROM sources WHERE id = ?")
        .bind(source_id)
        .fetch_optional(pool)
        .await?;
    Ok(counters)
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<SourceCounters>> {
    let sources = sqlx::query_as("SELECT * FROM sources ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(sources)
}

/// Ids of every source that currently has at least one item. Used when a
/// caller wants a full recompute pass without tracking which sources it
/// touched.
pub async fn ids_with_items(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT source_id FROM items ORDER BY 1")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
