//! # Data model
//!
//! Core records tracked by the lifecycle engine:
//!
//! - [`Item`] — one discovered content entry, keyed by a stable id and a
//!   dedup `link`. Its `pool_status` is the single source of truth for the
//!   lifecycle stage; the transition timestamps are append-only and survive
//!   later stage changes (they feed the funnel analytics).
//! - [`SourceCounters`] — per-feed rollups, always reproducible from a scan
//!   of that feed's items (see `stats::recompute`).
//! - [`LegacyLogEntry`] — rows of the historical recommendation log, input
//!   to the migration engine only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle stage of an item. Exactly one holds at any time.
///
/// `None` on `Item::pool_status` means the row predates the current data
/// model and is still awaiting migration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PoolStatus {
    Raw,
    PrescreenedOut,
    Stale,
    AnalyzedNotQualified,
    Candidate,
    Recommended,
    Exited,
}

impl PoolStatus {
    pub const ALL: [PoolStatus; 7] = [
        PoolStatus::Raw,
        PoolStatus::PrescreenedOut,
        PoolStatus::Stale,
        PoolStatus::AnalyzedNotQualified,
        PoolStatus::Candidate,
        PoolStatus::Recommended,
        PoolStatus::Exited,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Raw => "raw",
            PoolStatus::PrescreenedOut => "prescreened_out",
            PoolStatus::Stale => "stale",
            PoolStatus::AnalyzedNotQualified => "analyzed_not_qualified",
            PoolStatus::Candidate => "candidate",
            PoolStatus::Recommended => "recommended",
            PoolStatus::Exited => "exited",
        }
    }

    /// Terminal stages never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PoolStatus::Stale | PoolStatus::Exited)
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(PoolStatus::Raw),
            "prescreened_out" => Ok(PoolStatus::PrescreenedOut),
            "stale" => Ok(PoolStatus::Stale),
            "analyzed_not_qualified" => Ok(PoolStatus::AnalyzedNotQualified),
            "candidate" => Ok(PoolStatus::Candidate),
            "recommended" => Ok(PoolStatus::Recommended),
            "exited" => Ok(PoolStatus::Exited),
            other => Err(format!("unknown pool status '{other}'")),
        }
    }
}

/// Terminal cause recorded when an item leaves the candidate/recommended
/// stage. Set iff `pool_status == Exited`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExitReason {
    Read,
    Disliked,
    Saved,
    Replaced,
    Expired,
    QualityDropped,
    SourceUnsubscribed,
    SourceDeleted,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Read => "read",
            ExitReason::Disliked => "disliked",
            ExitReason::Saved => "saved",
            ExitReason::Replaced => "replaced",
            ExitReason::Expired => "expired",
            ExitReason::QualityDropped => "quality_dropped",
            ExitReason::SourceUnsubscribed => "source_unsubscribed",
            ExitReason::SourceDeleted => "source_deleted",
        }
    }

    /// `read`/`disliked`/`saved` are user feedback on a surfaced item and
    /// are only valid when exiting from `Recommended`.
    pub fn requires_recommended(&self) -> bool {
        matches!(self, ExitReason::Read | ExitReason::Disliked | ExitReason::Saved)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(ExitReason::Read),
            "disliked" => Ok(ExitReason::Disliked),
            "saved" => Ok(ExitReason::Saved),
            "replaced" => Ok(ExitReason::Replaced),
            "expired" => Ok(ExitReason::Expired),
            "quality_dropped" => Ok(ExitReason::QualityDropped),
            "source_unsubscribed" => Ok(ExitReason::SourceUnsubscribed),
            "source_deleted" => Ok(ExitReason::SourceDeleted),
            other => Err(format!("unknown exit reason '{other}'")),
        }
    }
}

/// One discovered content entry.
///
/// Items are never physically deleted; `Exited` is a terminal state, not a
/// removal, so the audit trail stays available to analytics.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Item {
    pub id: String,
    pub source_id: String,
    /// Dedup key across re-fetches of the same source listing.
    pub link: String,
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    /// True while still present in the upstream source's current listing.
    pub in_source: bool,
    pub pool_status: Option<PoolStatus>,
    /// Set only once an external scorer has run.
    pub score: Option<f64>,
    // Append-only transition timestamps: never cleared once set.
    pub candidate_entered_at: Option<DateTime<Utc>>,
    pub recommended_entered_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    // Derived flags, written atomically with pool_status.
    pub read: bool,
    pub disliked: bool,
    pub starred: bool,
    // Legacy fields: migration input only. The migration engine is the sole
    // interpreter of these.
    pub legacy_recommended: Option<bool>,
    pub legacy_in_pool: Option<bool>,
    pub legacy_pool_added_at: Option<DateTime<Utc>>,
    pub legacy_pool_removed_at: Option<DateTime<Utc>>,
    pub legacy_pool_removed_reason: Option<String>,
}

/// Payload for creating an item on first observation from a source.
#[derive(Debug, Clone, Deserialize)]
pub struct NewItem {
    pub source_id: String,
    pub link: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Per-source rollups. Never authoritative on their own: `stats::recompute`
/// overwrites the whole record from a scan of the source's items.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SourceCounters {
    pub id: String,
    pub name: Option<String>,
    pub total_items: i64,
    pub in_source_items: i64,
    /// Items an external scorer has run on (`score` present).
    pub analyzed_items: i64,
    pub raw_count: i64,
    pub prescreened_out_count: i64,
    pub stale_count: i64,
    pub analyzed_not_qualified_count: i64,
    pub candidate_count: i64,
    pub recommended_count: i64,
    pub exited_count: i64,
    // Cumulative ("ever reached") counts, derived from timestamp presence.
    pub ever_recommended: i64,
    pub ever_read: i64,
    pub ever_disliked: i64,
    /// Assigned only among sources with >3 items: the 3 sources with the
    /// lowest cumulative recommended count.
    pub worst_performer: bool,
}

/// One row of the historical recommendation log, keyed by the item's dedup
/// link. Multiple entries per link are allowed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LegacyLogEntry {
    pub link: String,
    pub status: Option<String>,
    pub feedback: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}
