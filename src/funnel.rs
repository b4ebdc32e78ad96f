//! # Funnel Analytics
//!
//! Cumulative cohort metrics derived from the append-only transition
//! timestamps, not from the current `pool_status`. "Ever candidate" counts
//! every item with `candidate_entered_at` set, including items that exited
//! long ago — counting by current state instead would silently undercount
//! converted-then-exited items, which is the whole point of keeping the
//! timestamps around.
//!
//! The exit-reason breakdown covers only items that passed through
//! `recommended`: pre-recommendation dropouts (stale, prescreened-out) are
//! not "exits" in the user-facing funnel sense.

use crate::error::Result;
use crate::model::PoolStatus;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

/// Current-snapshot counts, keyed by `pool_status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CurrentCounts {
    pub raw: i64,
    pub prescreened_out: i64,
    pub stale: i64,
    pub analyzed_not_qualified: i64,
    pub candidate: i64,
    pub recommended: i64,
    pub exited: i64,
}

impl CurrentCounts {
    pub fn get(&self, status: PoolStatus) -> i64 {
        match status {
            PoolStatus::Raw => self.raw,
            PoolStatus::PrescreenedOut => self.prescreened_out,
            PoolStatus::Stale => self.stale,
            PoolStatus::AnalyzedNotQualified => self.analyzed_not_qualified,
            PoolStatus::Candidate => self.candidate,
            PoolStatus::Recommended => self.recommended,
            PoolStatus::Exited => self.exited,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelReport {
    /// `None` = whole store, `Some(id)` = one source.
    pub source_id: Option<String>,
    pub total_items: i64,
    /// Rows still awaiting migration (`pool_status` unset).
    pub unclassified: i64,
    pub current: CurrentCounts,
    // Cumulative, timestamp-derived cohorts.
    pub ever_candidate: i64,
    pub ever_recommended: i64,
    pub ever_exited: i64,
    /// Exit reasons of items that were recommended at some point.
    pub exit_reasons: BTreeMap<String, i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct FunnelScan {
    total_items: i64,
    unclassified: i64,
    raw: i64,
    prescreened_out: i64,
    stale: i64,
    analyzed_not_qualified: i64,
    candidate: i64,
    recommended: i64,
    exited: i64,
    ever_candidate: i64,
    ever_recommended: i64,
    ever_exited: i64,
}

/// Compute the funnel over the whole store or one source.
pub async fn compute(pool: &SqlitePool, source_id: Option<&str>) -> Result<FunnelReport> {
    // One aggregate pass; the optional source filter is the only variation.
    let filter = if source_id.is_some() { "WHERE source_id = ?" } else { "" };
    let sql = format!(
        r#"
        SELECT
            COUNT(*) AS total_items,
            COALESCE(SUM(CASE WHEN pool_status IS NULL THEN 1 ELSE 0 END), 0) AS unclassified,
            COALESCE(SUM(CASE WHEN pool_status = 'raw' THEN 1 ELSE 0 END), 0) AS raw,
            COALESCE(SUM(CASE WHEN pool_status = 'prescreened_out' THEN 1 ELSE 0 END), 0) AS prescreened_out,
            COALESCE(SUM(CASE WHEN pool_status = 'stale' THEN 1 ELSE 0 END), 0) AS stale,
            COALESCE(SUM(CASE WHEN pool_status = 'analyzed_not_qualified' THEN 1 ELSE 0 END), 0) AS analyzed_not_qualified,
            COALESCE(SUM(CASE WHEN pool_status = 'candidate' THEN 1 ELSE 0 END), 0) AS candidate,
            COALESCE(SUM(CASE WHEN pool_status = 'recommended' THEN 1 ELSE 0 END), 0) AS recommended,
            COALESCE(SUM(CASE WHEN pool_status = 'exited' THEN 1 ELSE 0 END), 0) AS exited,
            COALESCE(SUM(CASE WHEN candidate_entered_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS ever_candidate,
            COALESCE(SUM(CASE WHEN recommended_entered_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS ever_recommended,
            COALESCE(SUM(CASE WHEN exited_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS ever_exited
        FROM items {filter}
        "#
    );

    let mut scan_q = sqlx::query_as::<_, FunnelScan>(&sql);
    if let Some(sid) = source_id {
        scan_q = scan_q.bind(sid);
    }
    let scan = scan_q.fetch_one(pool).await?;

    let reasons_sql = format!(
        "SELECT exit_reason, COUNT(*) AS n FROM items \
         WHERE recommended_entered_at IS NOT NULL AND exit_reason IS NOT NULL {} \
         GROUP BY exit_reason",
        if source_id.is_some() { "AND source_id = ?" } else { "" }
    );
    let mut reasons_q = sqlx::query_as::<_, (String, i64)>(&reasons_sql);
    if let Some(sid) = source_id {
        reasons_q = reasons_q.bind(sid);
    }
    let reasons = reasons_q.fetch_all(pool).await?;

    Ok(FunnelReport {
        source_id: source_id.map(str::to_string),
        total_items: scan.total_items,
        unclassified: scan.unclassified,
        current: CurrentCounts {
            raw: scan.raw,
            prescreened_out: scan.prescreened_out,
            stale: scan.stale,
            analyzed_not_qualified: scan.analyzed_not_qualified,
            candidate: scan.candidate,
            recommended: scan.recommended,
            exited: scan.exited,
        },
        ever_candidate: scan.ever_candidate,
        ever_recommended: scan.ever_recommended,
        ever_exited: scan.ever_exited,
        exit_reasons: reasons.into_iter().collect(),
    })
}
