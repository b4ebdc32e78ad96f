// tests/migration_rules.rs
// End-to-end reclassification of legacy rows through the migration engine.

use chrono::{TimeZone, Utc};
use feed_triage_engine::migrate::{run_startup_migrations, MigrationConfig};
use feed_triage_engine::model::{ExitReason, Item, PoolStatus};
use feed_triage_engine::stats;
use feed_triage_engine::store::init::memory_pool;
use sqlx::SqlitePool;

const THRESHOLD: f64 = 6.5;

/// Legacy row as the old flat-boolean model wrote it: no pool_status.
#[derive(Default)]
struct LegacyRow {
    source_id: &'static str,
    link: &'static str,
    in_source: bool,
    score: Option<f64>,
    read: bool,
    disliked: bool,
    legacy_recommended: Option<bool>,
    legacy_in_pool: Option<bool>,
    legacy_pool_added_at: Option<chrono::DateTime<Utc>>,
    legacy_pool_removed_reason: Option<&'static str>,
}

async fn insert_legacy(pool: &SqlitePool, row: LegacyRow) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO items (id, source_id, link, fetched_at, in_source, pool_status, score, \
         read, disliked, legacy_recommended, legacy_in_pool, legacy_pool_added_at, \
         legacy_pool_removed_reason) \
         VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(row.source_id)
    .bind(row.link)
    .bind(Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap())
    .bind(row.in_source)
    .bind(row.score)
    .bind(row.read)
    .bind(row.disliked)
    .bind(row.legacy_recommended)
    .bind(row.legacy_in_pool)
    .bind(row.legacy_pool_added_at)
    .bind(row.legacy_pool_removed_reason)
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn insert_log(pool: &SqlitePool, link: &str, status: Option<&str>, feedback: Option<&str>) {
    sqlx::query("INSERT INTO legacy_recommendation_log (link, status, feedback) VALUES (?, ?, ?)")
        .bind(link)
        .bind(status)
        .bind(feedback)
        .execute(pool)
        .await
        .unwrap();
}

async fn fetch(pool: &SqlitePool, id: &str) -> Item {
    sqlx::query_as("SELECT * FROM items WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn five_item_source_migrates_and_recomputes() {
    let pool = memory_pool().await.unwrap();

    let still_live = insert_legacy(
        &pool,
        LegacyRow {
            source_id: "feed-a",
            link: "https://a/live",
            in_source: true,
            legacy_recommended: Some(true),
            legacy_in_pool: Some(true),
            legacy_pool_added_at: Some(Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        },
    )
    .await;
    let was_read = insert_legacy(
        &pool,
        LegacyRow {
            source_id: "feed-a",
            link: "https://a/read",
            in_source: true,
            read: true,
            legacy_recommended: Some(true),
            legacy_in_pool: Some(false),
            ..Default::default()
        },
    )
    .await;
    let scored_high = insert_legacy(
        &pool,
        LegacyRow {
            source_id: "feed-a",
            link: "https://a/high",
            in_source: true,
            score: Some(8.0),
            ..Default::default()
        },
    )
    .await;
    let scored_low = insert_legacy(
        &pool,
        LegacyRow {
            source_id: "feed-a",
            link: "https://a/low",
            in_source: true,
            score: Some(4.0),
            ..Default::default()
        },
    )
    .await;
    let untouched = insert_legacy(
        &pool,
        LegacyRow {
            source_id: "feed-a",
            link: "https://a/new",
            in_source: true,
            ..Default::default()
        },
    )
    .await;

    let report = run_startup_migrations(&pool, THRESHOLD, MigrationConfig::default())
        .await
        .unwrap();
    assert_eq!(report.to_recommended, 1);
    assert_eq!(report.to_exited, 1);
    assert_eq!(report.to_candidate, 1);
    assert_eq!(report.to_not_qualified, 1);
    assert_eq!(report.to_raw, 1);
    assert_eq!(report.errors, 0);

    let live = fetch(&pool, &still_live).await;
    assert_eq!(live.pool_status, Some(PoolStatus::Recommended));
    assert_eq!(
        live.recommended_entered_at,
        Some(Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap()),
        "backfilled from the legacy pool-added timestamp"
    );

    let read = fetch(&pool, &was_read).await;
    assert_eq!(read.pool_status, Some(PoolStatus::Exited));
    assert_eq!(read.exit_reason, Some(ExitReason::Read));
    assert!(read.read && !read.disliked);
    assert!(read.exited_at.is_some());

    assert_eq!(fetch(&pool, &scored_high).await.pool_status, Some(PoolStatus::Candidate));
    assert_eq!(
        fetch(&pool, &scored_low).await.pool_status,
        Some(PoolStatus::AnalyzedNotQualified)
    );
    assert_eq!(fetch(&pool, &untouched).await.pool_status, Some(PoolStatus::Raw));

    // Rollups after the batch, as the stats-refresh trigger would run them.
    let c = stats::recompute(&pool, "feed-a").await.unwrap();
    assert_eq!(c.total_items, 5);
    assert_eq!(c.candidate_count, 1);
    assert_eq!(c.analyzed_not_qualified_count, 1);
    assert_eq!(c.raw_count, 1);
    assert_eq!(c.recommended_count, 1);
    assert_eq!(c.exited_count, 1);
    assert_eq!(c.analyzed_items, 2);
    assert_eq!(c.ever_read, 1);
    assert_eq!(c.ever_recommended, 2, "live + historically recommended");
}

#[tokio::test]
async fn event_log_outranks_item_flags() {
    let pool = memory_pool().await.unwrap();
    let id = insert_legacy(
        &pool,
        LegacyRow {
            source_id: "feed-a",
            link: "https://a/1",
            in_source: true,
            read: true,
            legacy_recommended: Some(true),
            legacy_in_pool: Some(false),
            ..Default::default()
        },
    )
    .await;
    // Several attempts logged for this link; "saved" feedback must win over
    // both the replaced status and the read flag.
    insert_log(&pool, "https://a/1", Some("replaced"), None).await;
    insert_log(&pool, "https://a/1", Some("expired"), Some("saved")).await;

    run_startup_migrations(&pool, THRESHOLD, MigrationConfig::default())
        .await
        .unwrap();

    let item = fetch(&pool, &id).await;
    assert_eq!(item.exit_reason, Some(ExitReason::Saved));
    assert!(item.starred, "derived flag follows the saved exit");
    assert!(!item.read, "derived flags are recomputed, not inherited");
}

#[tokio::test]
async fn legacy_removed_reason_is_last_resort_before_fallback() {
    let pool = memory_pool().await.unwrap();
    let with_reason = insert_legacy(
        &pool,
        LegacyRow {
            source_id: "feed-a",
            link: "https://a/reason",
            in_source: true,
            legacy_recommended: Some(true),
            legacy_in_pool: Some(false),
            legacy_pool_removed_reason: Some("source_unsubscribed"),
            ..Default::default()
        },
    )
    .await;
    let bare = insert_legacy(
        &pool,
        LegacyRow {
            source_id: "feed-a",
            link: "https://a/bare",
            in_source: true,
            legacy_recommended: Some(true),
            legacy_in_pool: Some(false),
            ..Default::default()
        },
    )
    .await;

    let report = run_startup_migrations(&pool, THRESHOLD, MigrationConfig::default())
        .await
        .unwrap();

    assert_eq!(
        fetch(&pool, &with_reason).await.exit_reason,
        Some(ExitReason::SourceUnsubscribed)
    );
    assert_eq!(fetch(&pool, &bare).await.exit_reason, Some(ExitReason::Expired));
    assert_eq!(report.reason_fallbacks, 1);
}

#[tokio::test]
async fn orphan_log_links_are_tallied_not_fatal() {
    let pool = memory_pool().await.unwrap();
    insert_legacy(
        &pool,
        LegacyRow {
            source_id: "feed-a",
            link: "https://a/1",
            in_source: true,
            ..Default::default()
        },
    )
    .await;
    // Log rows for items long gone (cross-feed or deleted).
    insert_log(&pool, "https://gone/1", Some("expired"), None).await;
    insert_log(&pool, "https://gone/1", Some("replaced"), None).await;
    insert_log(&pool, "https://gone/2", None, Some("saved")).await;

    let report = run_startup_migrations(&pool, THRESHOLD, MigrationConfig::default())
        .await
        .unwrap();
    assert_eq!(report.missing_log_links, 2, "distinct links, not rows");
    assert_eq!(report.errors, 0);
}

#[tokio::test]
async fn stale_backfill_runs_after_reclassification() {
    let pool = memory_pool().await.unwrap();

    // Gone from the source, never scored: the v1 rules leave it, v2 claims it.
    let gone_unscored = insert_legacy(
        &pool,
        LegacyRow {
            source_id: "feed-a",
            link: "https://a/gone",
            in_source: false,
            ..Default::default()
        },
    )
    .await;
    // Gone from the source but with a legacy recommendation: v1 rule 2 must
    // claim it before the backfill can see it.
    let gone_recommended = insert_legacy(
        &pool,
        LegacyRow {
            source_id: "feed-a",
            link: "https://a/gone-reco",
            in_source: false,
            legacy_recommended: Some(true),
            legacy_in_pool: Some(false),
            legacy_pool_removed_reason: Some("replaced"),
            ..Default::default()
        },
    )
    .await;

    let report = run_startup_migrations(&pool, THRESHOLD, MigrationConfig::default())
        .await
        .unwrap();
    assert_eq!(report.to_stale, 1);
    assert_eq!(report.to_exited, 1);

    assert_eq!(fetch(&pool, &gone_unscored).await.pool_status, Some(PoolStatus::Stale));
    assert_eq!(
        fetch(&pool, &gone_recommended).await.pool_status,
        Some(PoolStatus::Exited)
    );
}
