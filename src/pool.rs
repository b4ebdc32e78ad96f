//! # Pool State Machine
//!
//! The authoritative logic for lifecycle transitions of one item. Every
//! operation is a single guarded `UPDATE ... WHERE id = ? AND pool_status = ?`
//! so the precondition check and the write are one atomic statement, and the
//! derived flags (`read`/`disliked`/`starred`) are computed from
//! `(pool_status, exit_reason)` inside that same statement — there is never
//! a window where they disagree.
//!
//! Replay safety: a transition whose precondition already fails because of a
//! prior identical call is a no-op success ([`Transition::applied`] = false),
//! so duplicate events are harmless. Anything else is a typed rejection.
//!
//! Policy on source loss (deliberate, see DESIGN.md): `mark_stale` never
//! touches `candidate`/`recommended` items. An item that advanced past
//! scoring and then dropped out of its source listing is exited explicitly
//! (usually with reason `expired`) by the caller, not silently staled.

use crate::error::{Error, Result};
use crate::model::{ExitReason, Item, PoolStatus};
use crate::store::items;
use chrono::Utc;
use metrics::counter;
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Outcome of a transition attempt. `applied == false` means the item was
/// already past the requested transition (idempotent replay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Transition {
    pub applied: bool,
    pub status: PoolStatus,
}

impl Transition {
    fn applied(status: PoolStatus) -> Self {
        Transition { applied: true, status }
    }
    fn noop(status: PoolStatus) -> Self {
        Transition { applied: false, status }
    }
}

/// Derived user-facing flags for a given `(status, reason)` pair.
/// Pure; the SQL in this module must agree with it.
pub fn derived_flags(status: PoolStatus, reason: Option<ExitReason>) -> (bool, bool, bool) {
    match (status, reason) {
        (PoolStatus::Exited, Some(ExitReason::Read)) => (true, false, false),
        (PoolStatus::Exited, Some(ExitReason::Disliked)) => (false, true, false),
        (PoolStatus::Exited, Some(ExitReason::Saved)) => (false, false, true),
        _ => (false, false, false),
    }
}

/// `raw -> prescreened_out` (keyword/prefilter said no before scoring).
pub async fn reject(pool: &SqlitePool, item_id: &str) -> Result<Transition> {
    let res = sqlx::query(
        "UPDATE items SET pool_status = 'prescreened_out' WHERE id = ? AND pool_status = 'raw'",
    )
    .bind(item_id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 1 {
        record_transition("reject");
        return Ok(Transition::applied(PoolStatus::PrescreenedOut));
    }

    let item = items::require(pool, item_id).await?;
    match item.pool_status {
        Some(PoolStatus::PrescreenedOut) => Ok(Transition::noop(PoolStatus::PrescreenedOut)),
        from => invalid("reject", from),
    }
}

/// `raw -> candidate | analyzed_not_qualified` depending on the external
/// score against the configured threshold. Records the score; stamps
/// `candidate_entered_at` on the qualifying path.
pub async fn classify(
    pool: &SqlitePool,
    item_id: &str,
    score: f64,
    threshold: f64,
) -> Result<Transition> {
    let qualified = score >= threshold;
    let now = Utc::now();

    let res = if qualified {
        sqlx::query(
            "UPDATE items SET pool_status = 'candidate', score = ?, \
             candidate_entered_at = COALESCE(candidate_entered_at, ?) \
             WHERE id = ? AND pool_status = 'raw'",
        )
        .bind(score)
        .bind(now)
        .bind(item_id)
        .execute(pool)
        .await?
    } else {
        sqlx::query(
            "UPDATE items SET pool_status = 'analyzed_not_qualified', score = ? \
             WHERE id = ? AND pool_status = 'raw'",
        )
        .bind(score)
        .bind(item_id)
        .execute(pool)
        .await?
    };

    if res.rows_affected() == 1 {
        record_transition("classify");
        return Ok(Transition::applied(if qualified {
            PoolStatus::Candidate
        } else {
            PoolStatus::AnalyzedNotQualified
        }));
    }

    let item = items::require(pool, item_id).await?;
    match item.pool_status {
        // Already classified by an earlier (possibly duplicate) scoring event.
        Some(s @ (PoolStatus::Candidate | PoolStatus::AnalyzedNotQualified)) => {
            Ok(Transition::noop(s))
        }
        from => invalid("classify", from),
    }
}

/// Pre-pool stages `-> stale` once the item has left its source listing.
/// No-op on already-terminal items and on candidate/recommended (see module
/// docs for the policy).
pub async fn mark_stale(pool: &SqlitePool, item_id: &str) -> Result<Transition> {
    let res = sqlx::query(
        "UPDATE items SET pool_status = 'stale' WHERE id = ? \
         AND pool_status IN ('raw', 'prescreened_out', 'analyzed_not_qualified')",
    )
    .bind(item_id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 1 {
        record_transition("mark_stale");
        return Ok(Transition::applied(PoolStatus::Stale));
    }

    let item = items::require(pool, item_id).await?;
    match item.pool_status {
        Some(s) if s.is_terminal() => Ok(Transition::noop(s)),
        Some(s @ (PoolStatus::Candidate | PoolStatus::Recommended)) => {
            debug!(item_id, status = %s, "mark_stale skipped: item already advanced");
            Ok(Transition::noop(s))
        }
        from => invalid("mark_stale", from),
    }
}

/// `candidate -> recommended`. Stamps `recommended_entered_at`.
pub async fn promote(pool: &SqlitePool, item_id: &str) -> Result<Transition> {
    let now = Utc::now();
    let res = sqlx::query(
        "UPDATE items SET pool_status = 'recommended', \
         recommended_entered_at = COALESCE(recommended_entered_at, ?) \
         WHERE id = ? AND pool_status = 'candidate'",
    )
    .bind(now)
    .bind(item_id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 1 {
        record_transition("promote");
        return Ok(Transition::applied(PoolStatus::Recommended));
    }

    let item = items::require(pool, item_id).await?;
    match item.pool_status {
        Some(PoolStatus::Recommended) => Ok(Transition::noop(PoolStatus::Recommended)),
        from => invalid("promote", from),
    }
}

/// `candidate | recommended -> exited`. Records `exited_at` and the reason;
/// user-feedback reasons (`read`/`disliked`/`saved`) are only accepted from
/// `recommended`. Replay on an exited item is a no-op and the first recorded
/// reason wins.
pub async fn exit(pool: &SqlitePool, item_id: &str, reason: ExitReason) -> Result<Transition> {
    let now = Utc::now();
    let (read, disliked, starred) = derived_flags(PoolStatus::Exited, Some(reason));

    let guard = if reason.requires_recommended() {
        "pool_status = 'recommended'"
    } else {
        "pool_status IN ('candidate', 'recommended')"
    };
    let sql = format!(
        "UPDATE items SET pool_status = 'exited', exit_reason = ?, \
         exited_at = COALESCE(exited_at, ?), read = ?, disliked = ?, starred = ? \
         WHERE id = ? AND {guard}"
    );

    let res = sqlx::query(&sql)
        .bind(reason)
        .bind(now)
        .bind(read)
        .bind(disliked)
        .bind(starred)
        .bind(item_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 1 {
        record_transition("exit");
        return Ok(Transition::applied(PoolStatus::Exited));
    }

    let item = items::require(pool, item_id).await?;
    match item.pool_status {
        Some(PoolStatus::Exited) => {
            if item.exit_reason != Some(reason) {
                debug!(
                    item_id,
                    recorded = ?item.exit_reason,
                    requested = %reason,
                    "exit replay with different reason ignored"
                );
            }
            Ok(Transition::noop(PoolStatus::Exited))
        }
        Some(from @ PoolStatus::Candidate) if reason.requires_recommended() => {
            counter!("pool_invalid_transitions_total").increment(1);
            Err(Error::InvalidExitReason { from, reason })
        }
        from => invalid("exit", from),
    }
}

fn invalid(op: &'static str, from: Option<PoolStatus>) -> Result<Transition> {
    counter!("pool_invalid_transitions_total").increment(1);
    Err(Error::InvalidTransition { op, from })
}

fn record_transition(op: &'static str) {
    counter!("pool_transitions_total", "op" => op).increment(1);
}

/// Outcome of a stale sweep over a source (or the whole store).
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SweepReport {
    pub examined: u64,
    pub marked: u64,
    pub errors: u64,
}

/// The dedicated stale pass: finds items that dropped out of their source
/// listing before advancing past scoring and marks them stale one by one.
/// Per-item failures are logged and counted; the sweep never aborts.
pub async fn sweep_stale(pool: &SqlitePool, source_id: Option<&str>) -> Result<SweepReport> {
    let ids: Vec<(String,)> = match source_id {
        Some(sid) => {
            sqlx::query_as(
                "SELECT id FROM items WHERE source_id = ? AND in_source = 0 \
                 AND pool_status IN ('raw', 'prescreened_out', 'analyzed_not_qualified')",
            )
            .bind(sid)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT id FROM items WHERE in_source = 0 \
                 AND pool_status IN ('raw', 'prescreened_out', 'analyzed_not_qualified')",
            )
            .fetch_all(pool)
            .await?
        }
    };

    let mut report = SweepReport {
        examined: ids.len() as u64,
        ..Default::default()
    };

    for (id,) in ids {
        match mark_stale(pool, &id).await {
            Ok(t) if t.applied => report.marked += 1,
            Ok(_) => {}
            Err(e) => {
                report.errors += 1;
                warn!(item_id = %id, error = %e, "stale sweep: item skipped");
            }
        }
    }

    debug!(?report, source = ?source_id, "stale sweep finished");
    Ok(report)
}
