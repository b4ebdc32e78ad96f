//! # Feed Statistics Aggregator
//!
//! Source counters are a materialized view over the item store: `recompute`
//! re-scans one source's items and overwrites every counter as a single
//! unit. Counters are never patched incrementally — drift is impossible by
//! construction, at the cost of O(items-per-source) work per call, which is
//! the deliberate trade.
//!
//! Callers invoke `recompute` after any batch of transitions touching the
//! source; until they do, the stored snapshot is merely stale, never wrong
//! in a way the next call can't fix.

use crate::error::Result;
use crate::model::SourceCounters;
use crate::store::sources;
use metrics::counter;
use sqlx::SqlitePool;
use tracing::debug;

#[derive(Debug, sqlx::FromRow)]
struct Scan {
    total_items: i64,
    in_source_items: i64,
    analyzed_items: i64,
    raw_count: i64,
    prescreened_out_count: i64,
    stale_count: i64,
    analyzed_not_qualified_count: i64,
    candidate_count: i64,
    recommended_count: i64,
    exited_count: i64,
    ever_recommended: i64,
    ever_read: i64,
    ever_disliked: i64,
}

async fn scan_source(pool: &SqlitePool, source_id: &str) -> Result<Scan> {
    let scan = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) AS total_items,
            COALESCE(SUM(in_source), 0) AS in_source_items,
            COALESCE(SUM(CASE WHEN score IS NOT NULL THEN 1 ELSE 0 END), 0) AS analyzed_items,
            COALESCE(SUM(CASE WHEN pool_status = 'raw' THEN 1 ELSE 0 END), 0) AS raw_count,
            COALESCE(SUM(CASE WHEN pool_status = 'prescreened_out' THEN 1 ELSE 0 END), 0) AS prescreened_out_count,
            COALESCE(SUM(CASE WHEN pool_status = 'stale' THEN 1 ELSE 0 END), 0) AS stale_count,
            COALESCE(SUM(CASE WHEN pool_status = 'analyzed_not_qualified' THEN 1 ELSE 0 END), 0) AS analyzed_not_qualified_count,
            COALESCE(SUM(CASE WHEN pool_status = 'candidate' THEN 1 ELSE 0 END), 0) AS candidate_count,
            COALESCE(SUM(CASE WHEN pool_status = 'recommended' THEN 1 ELSE 0 END), 0) AS recommended_count,
            COALESCE(SUM(CASE WHEN pool_status = 'exited' THEN 1 ELSE 0 END), 0) AS exited_count,
            COALESCE(SUM(CASE WHEN recommended_entered_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS ever_recommended,
            COALESCE(SUM(CASE WHEN exit_reason = 'read' THEN 1 ELSE 0 END), 0) AS ever_read,
            COALESCE(SUM(CASE WHEN exit_reason = 'disliked' THEN 1 ELSE 0 END), 0) AS ever_disliked
        FROM items
        WHERE source_id = ?
        "#,
    )
    .bind(source_id)
    .fetch_one(pool)
    .await?;
    Ok(scan)
}

/// Re-scan one source's items and overwrite its counters.
///
/// Post-condition: the stored record equals what an independent fresh scan
/// would produce at commit time. Returns the freshly written counters.
pub async fn recompute(pool: &SqlitePool, source_id: &str) -> Result<SourceCounters> {
    sources::ensure(pool, source_id, None).await?;
    let scan = scan_source(pool, source_id).await?;

    sqlx::query(
        r#"
        UPDATE sources SET
            total_items = ?,
            in_source_items = ?,
            analyzed_items = ?,
            raw_count = ?,
            prescreened_out_count = ?,
            stale_count = ?,
            analyzed_not_qualified_count = ?,
            candidate_count = ?,
            recommended_count = ?,
            exited_count = ?,
            ever_recommended = ?,
            ever_read = ?,
            ever_disliked = ?
        WHERE id = ?
        "#,
    )
    .bind(scan.total_items)
    .bind(scan.in_source_items)
    .bind(scan.analyzed_items)
    .bind(scan.raw_count)
    .bind(scan.prescreened_out_count)
    .bind(scan.stale_count)
    .bind(scan.analyzed_not_qualified_count)
    .bind(scan.candidate_count)
    .bind(scan.recommended_count)
    .bind(scan.exited_count)
    .bind(scan.ever_recommended)
    .bind(scan.ever_read)
    .bind(scan.ever_disliked)
    .bind(source_id)
    .execute(pool)
    .await?;

    counter!("stats_recompute_total").increment(1);
    debug!(source_id, total = scan.total_items, "source counters recomputed");

    let counters = sources::get_counters(pool, source_id).await?;
    // ensure() above guarantees the row exists.
    counters.ok_or_else(|| sqlx::Error::RowNotFound.into())
}

/// Recompute every source that has items. Convenience for stats-refresh
/// triggers that don't track which sources a batch touched.
pub async fn recompute_all(pool: &SqlitePool) -> Result<Vec<SourceCounters>> {
    let mut out = Vec::new();
    for source_id in sources::ids_with_items(pool).await? {
        out.push(recompute(pool, &source_id).await?);
    }
    Ok(out)
}

/// Re-assign the `worst_performer` flag: among sources with more than 3
/// items, the 3 with the lowest cumulative recommended count carry it;
/// everyone else is cleared. Runs in one transaction so readers never see a
/// half-assigned set.
pub async fn refresh_worst_performers(pool: &SqlitePool) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE sources SET worst_performer = 0")
        .execute(&mut *tx)
        .await?;

    let res = sqlx::query(
        r#"
        UPDATE sources SET worst_performer = 1 WHERE id IN (
            SELECT id FROM sources
            WHERE total_items > 3
            ORDER BY ever_recommended ASC, id ASC
            LIMIT 3
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(res.rows_affected())
}
