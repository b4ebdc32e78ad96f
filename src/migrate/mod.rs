//! # Migration Engine
//!
//! One-time (per data version), idempotent, resumable reclassification of
//! legacy rows into the pool-status vocabulary. Legacy rows combine flat
//! boolean flags on the item (`legacy_recommended`, `legacy_in_pool`,
//! `read`, `disliked`) with a separate recommendation log keyed by the
//! item's dedup link; `pool_status IS NULL` marks a row as not yet
//! migrated.
//!
//! The rule table is data — an ordered list of predicate→action entries —
//! so its precedence is testable independently of control flow. Rules are
//! NOT commutative: the "still recommended" rule must claim in-pool rows
//! before the "exited recommendation" rule sees them.
//!
//! Resumability comes for free: passes run in bounded batches, each batch
//! in one transaction, and every writer guards on `pool_status IS NULL`, so
//! a crash mid-pass leaves committed batches classified and the remainder
//! untouched; re-running skips everything already claimed.
//!
//! Completion is tracked per version in the settings record. Every engine
//! start does a cheap bounded sample first and skips the full pass when the
//! flag is set or the sample comes back empty.

use crate::error::Result;
use crate::model::{ExitReason, Item, LegacyLogEntry, PoolStatus};
use crate::pool::derived_flags;
use crate::store::settings;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{info, warn};

/// Highest data version this build knows how to migrate to.
/// v1 = legacy flag/log reclassification, v2 = stale backfill.
pub const CURRENT_DATA_VERSION: i32 = 2;

/// Rows v1 can claim. Anything outside this predicate (no legacy
/// recommendation, never scored, already gone from its source) is left for
/// the v2 stale backfill.
const V1_CLAIMABLE: &str =
    "pool_status IS NULL AND (legacy_recommended = 1 OR score IS NOT NULL OR in_source = 1)";

/// Rows v2 claims: unset-or-raw items that already left their source.
const V2_CLAIMABLE: &str = "(pool_status IS NULL OR pool_status = 'raw') AND in_source = 0";

#[derive(Debug, Clone, Copy)]
pub struct MigrationConfig {
    /// Items per transaction during a full pass.
    pub batch_size: usize,
    /// Rows examined by the cheap startup sample.
    pub sample_limit: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig { batch_size: 200, sample_limit: 50 }
    }
}

/// Diagnostic tally of a migration run. Missing log links and per-item
/// failures are counted, never fatal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub versions_run: Vec<i32>,
    pub versions_skipped: Vec<i32>,
    pub to_recommended: u64,
    pub to_exited: u64,
    pub to_candidate: u64,
    pub to_not_qualified: u64,
    pub to_raw: u64,
    pub to_stale: u64,
    /// Rule-2 rows where neither the log nor the legacy fields yielded a
    /// reason and the engine fell back to `expired`.
    pub reason_fallbacks: u64,
    /// Distinct log links with no matching item (expected: cross-feed or
    /// deleted items).
    pub missing_log_links: u64,
    pub errors: u64,
    pub batches: u64,
}

/// Historical recommendation log, indexed by dedup link.
pub type LogIndex = HashMap<String, Vec<LegacyLogEntry>>;

/// Target assignment computed by a rule for one legacy row.
#[derive(Debug, Clone, PartialEq)]
pub struct Reclassification {
    pub status: PoolStatus,
    pub exit_reason: Option<ExitReason>,
    pub candidate_entered_at: Option<DateTime<Utc>>,
    pub recommended_entered_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    /// True when the exit reason came from the terminal fallback.
    pub reason_fell_back: bool,
}

impl Reclassification {
    fn plain(status: PoolStatus) -> Self {
        Reclassification {
            status,
            exit_reason: None,
            candidate_entered_at: None,
            recommended_entered_at: None,
            exited_at: None,
            reason_fell_back: false,
        }
    }
}

/// One entry of the ordered rule table: first match wins.
pub struct MigrationRule {
    pub name: &'static str,
    pub apply: fn(&Item, &LogIndex, f64) -> Option<Reclassification>,
}

/// The ordered v1 rule table. Order is load-bearing; see module docs.
pub fn rule_table() -> Vec<MigrationRule> {
    vec![
        MigrationRule { name: "still_recommended", apply: rule_still_recommended },
        MigrationRule { name: "exited_recommendation", apply: rule_exited_recommendation },
        MigrationRule { name: "scored_unclassified", apply: rule_scored_unclassified },
        MigrationRule { name: "unscored_in_source", apply: rule_unscored_in_source },
    ]
}

/// Run the rule table over one legacy row. `None` means no v1 rule claims
/// the row (it stays unset for the stale backfill).
pub fn reclassify(item: &Item, log: &LogIndex, threshold: f64) -> Option<Reclassification> {
    rule_table().iter().find_map(|rule| (rule.apply)(item, log, threshold))
}

/// Rule 1: `recommended=true AND inPool=true` — the recommendation is still
/// live. `recommended_entered_at` backfills from the legacy pool-added
/// timestamp.
fn rule_still_recommended(item: &Item, _log: &LogIndex, _threshold: f64) -> Option<Reclassification> {
    if item.legacy_recommended == Some(true) && item.legacy_in_pool == Some(true) {
        Some(Reclassification {
            recommended_entered_at: item.legacy_pool_added_at.or(Some(item.fetched_at)),
            ..Reclassification::plain(PoolStatus::Recommended)
        })
    } else {
        None
    }
}

/// Rule 2: the item was recommended at some point. Deliberately does NOT
/// re-check `inPool`: rule 1 has already claimed the still-live rows, and
/// checking here instead of relying on order would make the table
/// commutative-looking while it is not.
fn rule_exited_recommendation(item: &Item, log: &LogIndex, _threshold: f64) -> Option<Reclassification> {
    if item.legacy_recommended != Some(true) {
        return None;
    }

    let entries = log.get(&item.link).map(Vec::as_slice).unwrap_or(&[]);
    let (reason, fell_back) = resolve_exit_reason(item, entries);

    let exited_at = item
        .legacy_pool_removed_at
        .or(item.legacy_pool_added_at)
        .unwrap_or(item.fetched_at);

    Some(Reclassification {
        exit_reason: Some(reason),
        // These items passed through recommended historically; backfill the
        // timestamp so the funnel keeps counting them.
        recommended_entered_at: Some(item.legacy_pool_added_at.unwrap_or(exited_at)),
        exited_at: Some(exited_at),
        reason_fell_back: fell_back,
        ..Reclassification::plain(PoolStatus::Exited)
    })
}

/// Reason resolution for rule 2, in priority order: log feedback "saved",
/// log status "replaced", log status "expired", legacy read flag, legacy
/// disliked flag, parseable `legacy_pool_removed_reason`, else `expired`
/// (tallied as a fallback).
fn resolve_exit_reason(item: &Item, entries: &[LegacyLogEntry]) -> (ExitReason, bool) {
    if entries.iter().any(|e| e.feedback.as_deref() == Some("saved")) {
        return (ExitReason::Saved, false);
    }
    if entries.iter().any(|e| e.status.as_deref() == Some("replaced")) {
        return (ExitReason::Replaced, false);
    }
    if entries.iter().any(|e| e.status.as_deref() == Some("expired")) {
        return (ExitReason::Expired, false);
    }
    if item.read {
        return (ExitReason::Read, false);
    }
    if item.disliked {
        return (ExitReason::Disliked, false);
    }
    if let Some(raw) = item.legacy_pool_removed_reason.as_deref() {
        // Unknown strings fall through to the fallback rather than failing
        // the row.
        if let Ok(reason) = ExitReason::from_str(raw) {
            return (reason, false);
        }
    }
    (ExitReason::Expired, true)
}

/// Rule 3: a score exists but no status — apply the current classify
/// threshold.
fn rule_scored_unclassified(item: &Item, _log: &LogIndex, threshold: f64) -> Option<Reclassification> {
    let score = item.score?;
    if score >= threshold {
        Some(Reclassification {
            candidate_entered_at: Some(item.fetched_at),
            ..Reclassification::plain(PoolStatus::Candidate)
        })
    } else {
        Some(Reclassification::plain(PoolStatus::AnalyzedNotQualified))
    }
}

/// Rule 4: never scored, still listed by its source — plain `raw`.
fn rule_unscored_in_source(item: &Item, _log: &LogIndex, _threshold: f64) -> Option<Reclassification> {
    if item.in_source {
        Some(Reclassification::plain(PoolStatus::Raw))
    } else {
        None
    }
}

/// Run every pending migration. Safe to call on every engine start.
pub async fn run_startup_migrations(
    pool: &SqlitePool,
    threshold: f64,
    cfg: MigrationConfig,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    if prepare_version(pool, 1, V1_CLAIMABLE, cfg, &mut report).await? {
        run_v1_pass(pool, threshold, cfg, &mut report).await?;
        finish_version(pool, 1, V1_CLAIMABLE, &mut report).await?;
    }

    // The stale backfill only touches rows v1 did not claim, so it must run
    // logically after v1.
    if prepare_version(pool, 2, V2_CLAIMABLE, cfg, &mut report).await? {
        run_v2_pass(pool, cfg, &mut report).await?;
        finish_version(pool, 2, V2_CLAIMABLE, &mut report).await?;
    }

    gauge!("migration_last_run_ts").set(Utc::now().timestamp() as f64);
    info!(
        versions_run = ?report.versions_run,
        versions_skipped = ?report.versions_skipped,
        reclassified = report.to_recommended
            + report.to_exited
            + report.to_candidate
            + report.to_not_qualified
            + report.to_raw
            + report.to_stale,
        missing_log_links = report.missing_log_links,
        errors = report.errors,
        "startup migrations finished"
    );
    Ok(report)
}

/// Version gate: returns true when a full pass is required. A set flag or
/// an empty bounded sample short-circuits to "nothing to do".
async fn prepare_version(
    pool: &SqlitePool,
    version: i32,
    claimable: &str,
    cfg: MigrationConfig,
    report: &mut MigrationReport,
) -> Result<bool> {
    if settings::migration_completed(pool, version).await? {
        report.versions_skipped.push(version);
        return Ok(false);
    }

    if !sample_has_work(pool, claimable, cfg.sample_limit).await? {
        // Nothing legacy on file; persist that so future starts skip even
        // the sample.
        settings::set_migration_completed(pool, version).await?;
        report.versions_skipped.push(version);
        info!(version, "migration: sample found nothing to do");
        return Ok(false);
    }

    info!(version, "migration: running full pass");
    Ok(true)
}

/// Post-pass bookkeeping: the version flag is only set once a recount finds
/// zero claimable rows left.
async fn finish_version(
    pool: &SqlitePool,
    version: i32,
    claimable: &str,
    report: &mut MigrationReport,
) -> Result<()> {
    report.versions_run.push(version);

    let remaining = count_claimable(pool, claimable).await?;
    if remaining == 0 {
        settings::set_migration_completed(pool, version).await?;
        info!(version, "migration: complete");
    } else {
        // Per-item failures left work behind; the next start retries.
        warn!(version, remaining, "migration: pass finished with rows left");
    }
    Ok(())
}

async fn sample_has_work(pool: &SqlitePool, claimable: &str, limit: usize) -> Result<bool> {
    let sql = format!("SELECT id FROM items WHERE {claimable} LIMIT {limit}");
    let rows: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(pool).await?;
    Ok(!rows.is_empty())
}

async fn count_claimable(pool: &SqlitePool, claimable: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM items WHERE {claimable}");
    let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(pool).await?;
    Ok(count)
}

/// Full v1 pass: load the legacy log once, then reclassify claimable rows
/// in bounded transactional batches.
async fn run_v1_pass(
    pool: &SqlitePool,
    threshold: f64,
    cfg: MigrationConfig,
    report: &mut MigrationReport,
) -> Result<()> {
    let log = load_log_index(pool).await?;

    let (missing,): (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT link) FROM legacy_recommendation_log \
         WHERE link NOT IN (SELECT link FROM items)",
    )
    .fetch_one(pool)
    .await?;
    report.missing_log_links += missing as u64;
    counter!("migration_missing_log_total").increment(missing as u64);

    loop {
        let sql = format!(
            "SELECT * FROM items WHERE {V1_CLAIMABLE} ORDER BY fetched_at LIMIT {}",
            cfg.batch_size
        );
        let batch: Vec<Item> = sqlx::query_as(&sql).fetch_all(pool).await?;
        if batch.is_empty() {
            break;
        }

        let mut tx = pool.begin().await?;
        let mut applied_in_batch = 0u64;

        for item in &batch {
            let Some(re) = reclassify(item, &log, threshold) else {
                // The claimable predicate covers every rule, so this only
                // happens if the two drift apart.
                report.errors += 1;
                warn!(item_id = %item.id, "migration: no rule matched a claimable row");
                continue;
            };
            match apply_reclassification(&mut tx, &item.id, &re).await {
                Ok(()) => {
                    tally(report, &re);
                    applied_in_batch += 1;
                }
                Err(e) => {
                    report.errors += 1;
                    counter!("migration_errors_total").increment(1);
                    warn!(item_id = %item.id, error = %e, "migration: item skipped");
                }
            }
        }

        tx.commit().await?;
        report.batches += 1;

        if applied_in_batch == 0 {
            // Every row in the batch failed; bail instead of spinning on it.
            warn!("migration: batch made no progress, aborting pass");
            break;
        }
    }
    Ok(())
}

/// Full v2 pass: stale backfill for unset-or-raw rows that already left
/// their source.
async fn run_v2_pass(
    pool: &SqlitePool,
    cfg: MigrationConfig,
    report: &mut MigrationReport,
) -> Result<()> {
    loop {
        let sql = format!("SELECT id FROM items WHERE {V2_CLAIMABLE} LIMIT {}", cfg.batch_size);
        let batch: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(pool).await?;
        if batch.is_empty() {
            break;
        }

        let mut tx = pool.begin().await?;
        let mut applied_in_batch = 0u64;

        for (id,) in &batch {
            let res = sqlx::query(&format!(
                "UPDATE items SET pool_status = 'stale' WHERE id = ? AND {V2_CLAIMABLE}"
            ))
            .bind(id)
            .execute(&mut *tx)
            .await;
            match res {
                Ok(r) if r.rows_affected() == 1 => {
                    report.to_stale += 1;
                    counter!("migration_reclassified_total", "status" => "stale").increment(1);
                    applied_in_batch += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    report.errors += 1;
                    counter!("migration_errors_total").increment(1);
                    warn!(item_id = %id, error = %e, "stale backfill: item skipped");
                }
            }
        }

        tx.commit().await?;
        report.batches += 1;

        if applied_in_batch == 0 {
            warn!("stale backfill: batch made no progress, aborting pass");
            break;
        }
    }
    Ok(())
}

async fn load_log_index(pool: &SqlitePool) -> Result<LogIndex> {
    let entries: Vec<LegacyLogEntry> = sqlx::query_as(
        "SELECT link, status, feedback, created_at FROM legacy_recommendation_log ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    let mut index: LogIndex = HashMap::new();
    for entry in entries {
        index.entry(entry.link.clone()).or_default().push(entry);
    }
    Ok(index)
}

/// Write one reclassification. Guarded on `pool_status IS NULL` so replays
/// over already-migrated rows are no-ops, and timestamp backfills never
/// overwrite values that exist.
async fn apply_reclassification(
    tx: &mut Transaction<'_, Sqlite>,
    item_id: &str,
    re: &Reclassification,
) -> Result<()> {
    let (read, disliked, starred) = derived_flags(re.status, re.exit_reason);

    sqlx::query(
        "UPDATE items SET pool_status = ?, exit_reason = ?, \
         candidate_entered_at = COALESCE(candidate_entered_at, ?), \
         recommended_entered_at = COALESCE(recommended_entered_at, ?), \
         exited_at = COALESCE(exited_at, ?), \
         read = ?, disliked = ?, starred = ? \
         WHERE id = ? AND pool_status IS NULL",
    )
    .bind(re.status)
    .bind(re.exit_reason)
    .bind(re.candidate_entered_at)
    .bind(re.recommended_entered_at)
    .bind(re.exited_at)
    .bind(read)
    .bind(disliked)
    .bind(starred)
    .bind(item_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn tally(report: &mut MigrationReport, re: &Reclassification) {
    counter!("migration_reclassified_total", "status" => re.status.as_str()).increment(1);
    match re.status {
        PoolStatus::Recommended => report.to_recommended += 1,
        PoolStatus::Exited => report.to_exited += 1,
        PoolStatus::Candidate => report.to_candidate += 1,
        PoolStatus::AnalyzedNotQualified => report.to_not_qualified += 1,
        PoolStatus::Raw => report.to_raw += 1,
        PoolStatus::Stale => report.to_stale += 1,
        PoolStatus::PrescreenedOut => {}
    }
    if re.reason_fell_back {
        report.reason_fallbacks += 1;
    }
}
