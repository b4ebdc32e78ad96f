//! Item record accessors.
//!
//! Creation happens through [`observe`]: the first time a link is seen the
//! item is created in `raw`; later observations only refresh source
//! membership. Lifecycle mutation goes through `pool` (or the migration
//! engine), never through ad-hoc writes here.

use crate::error::{Error, Result};
use crate::model::{Item, NewItem, PoolStatus};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Record an item observed in a source listing.
///
/// New links insert a `raw` item; a link already on file only flips
/// `in_source` back on and refreshes `fetched_at`. Lifecycle fields of an
/// existing item are never touched here.
pub async fn observe(pool: &SqlitePool, new: &NewItem) -> Result<Item> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let item: Item = sqlx::query_as(
        r#"
        INSERT INTO items (id, source_id, link, title, published_at, fetched_at, in_source, pool_status)
        VALUES (?, ?, ?, ?, ?, ?, 1, 'raw')
        ON CONFLICT(link) DO UPDATE SET
            in_source = 1,
            fetched_at = excluded.fetched_at
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(&new.source_id)
    .bind(&new.link)
    .bind(&new.title)
    .bind(new.published_at)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(item)
}

pub async fn get(pool: &SqlitePool, item_id: &str) -> Result<Option<Item>> {
    let item = sqlx::query_as("SELECT * FROM items WHERE id = ?")
        .bind(item_id)
        .fetch_optional(pool)
        .await?;
    Ok(item)
}

/// Like [`get`] but a missing item is an error.
pub async fn require(pool: &SqlitePool, item_id: &str) -> Result<Item> {
    get(pool, item_id)
        .await?
        .ok_or_else(|| Error::ItemNotFound(item_id.to_string()))
}

pub async fn get_by_link(pool: &SqlitePool, link: &str) -> Result<Option<Item>> {
    let item = sqlx::query_as("SELECT * FROM items WHERE link = ?")
        .bind(link)
        .fetch_optional(pool)
        .await?;
    Ok(item)
}

/// Flip source membership for one item.
pub async fn set_in_source(pool: &SqlitePool, item_id: &str, in_source: bool) -> Result<()> {
    let res = sqlx::query("UPDATE items SET in_source = ? WHERE id = ?")
        .bind(in_source)
        .bind(item_id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(Error::ItemNotFound(item_id.to_string()));
    }
    Ok(())
}

/// Reconcile membership after a source listing refresh: every item of the
/// source not among `present_links` drops out of the listing. Items do not
/// change lifecycle state here; the stale sweep (or an explicit exit)
/// handles the consequences.
pub async fn mark_absent_except(
    pool: &SqlitePool,
    source_id: &str,
    present_links: &[String],
) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE items SET in_source = 0 WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

    for link in present_links {
        sqlx::query("UPDATE items SET in_source = 1 WHERE source_id = ? AND link = ?")
            .bind(source_id)
            .bind(link)
            .execute(&mut *tx)
            .await?;
    }

    let (dropped,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM items WHERE source_id = ? AND in_source = 0")
            .bind(source_id)
            .fetch_one(&mut *tx)
            .await?;

    tx.commit().await?;
    Ok(dropped as u64)
}

/// Read-only listing for the UI/reporting collaborator.
pub async fn list_by_status(
    pool: &SqlitePool,
    status: PoolStatus,
    source_id: Option<&str>,
    limit: i64,
) -> Result<Vec<Item>> {
    let items = match source_id {
        Some(sid) => {
            sqlx::query_as(
                "SELECT * FROM items WHERE pool_status = ? AND source_id = ? \
                 ORDER BY fetched_at DESC LIMIT ?",
            )
            .bind(status)
            .bind(sid)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT * FROM items WHERE pool_status = ? ORDER BY fetched_at DESC LIMIT ?",
            )
            .bind(status)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(items)
}
