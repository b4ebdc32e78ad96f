// tests/migration_idempotence.rs
// Re-running migrations must never change already-migrated rows, and
// completion flags must gate the expensive passes.

use chrono::{TimeZone, Utc};
use feed_triage_engine::migrate::{run_startup_migrations, MigrationConfig};
use feed_triage_engine::model::PoolStatus;
use feed_triage_engine::store::init::memory_pool;
use feed_triage_engine::store::settings;
use sqlx::SqlitePool;

const THRESHOLD: f64 = 6.5;

async fn seed(pool: &SqlitePool, link: &str, score: Option<f64>, recommended: bool, in_pool: bool) {
    sqlx::query(
        "INSERT INTO items (id, source_id, link, fetched_at, in_source, pool_status, score, \
         legacy_recommended, legacy_in_pool) VALUES (?, 'feed-a', ?, ?, 1, NULL, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(link)
    .bind(Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap())
    .bind(score)
    .bind(recommended)
    .bind(in_pool)
    .execute(pool)
    .await
    .unwrap();
}

async fn snapshot(pool: &SqlitePool) -> Vec<(String, Option<String>, Option<String>)> {
    sqlx::query_as(
        "SELECT link, pool_status, exit_reason FROM items ORDER BY link",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let pool = memory_pool().await.unwrap();
    seed(&pool, "https://a/1", None, true, true).await;
    seed(&pool, "https://a/2", None, true, false).await;
    seed(&pool, "https://a/3", Some(9.0), false, false).await;
    seed(&pool, "https://a/4", None, false, false).await;

    let first = run_startup_migrations(&pool, THRESHOLD, MigrationConfig::default())
        .await
        .unwrap();
    assert_eq!(first.versions_run, vec![1]);
    assert_eq!(first.versions_skipped, vec![2], "no stale candidates seeded");
    let after_first = snapshot(&pool).await;

    let second = run_startup_migrations(&pool, THRESHOLD, MigrationConfig::default())
        .await
        .unwrap();
    assert!(second.versions_run.is_empty());
    assert_eq!(second.versions_skipped, vec![1, 2]);
    assert_eq!(snapshot(&pool).await, after_first);
}

#[tokio::test]
async fn empty_store_sets_flags_without_a_pass() {
    let pool = memory_pool().await.unwrap();

    let report = run_startup_migrations(&pool, THRESHOLD, MigrationConfig::default())
        .await
        .unwrap();
    assert!(report.versions_run.is_empty());
    assert_eq!(report.versions_skipped, vec![1, 2]);
    assert!(settings::migration_completed(&pool, 1).await.unwrap());
    assert!(settings::migration_completed(&pool, 2).await.unwrap());

    // Once the flag is persisted, later legacy-looking rows are not picked
    // up. New rows enter through the live state machine instead.
    seed(&pool, "https://a/late", None, true, true).await;
    let again = run_startup_migrations(&pool, THRESHOLD, MigrationConfig::default())
        .await
        .unwrap();
    assert_eq!(again.versions_skipped, vec![1, 2]);

    let (status,): (Option<String>,) =
        sqlx::query_as("SELECT pool_status FROM items WHERE link = 'https://a/late'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, None);
}

#[tokio::test]
async fn interrupted_pass_resumes_without_touching_done_rows() {
    let pool = memory_pool().await.unwrap();
    seed(&pool, "https://a/1", None, true, true).await;
    seed(&pool, "https://a/2", Some(9.0), false, false).await;
    seed(&pool, "https://a/3", None, false, false).await;

    // Simulate a crash after an earlier partial pass: one row already
    // classified, with a reason the rules would not produce today.
    sqlx::query(
        "UPDATE items SET pool_status = 'exited', exit_reason = 'quality_dropped' \
         WHERE link = 'https://a/2'",
    )
    .execute(&pool)
    .await
    .unwrap();

    let report = run_startup_migrations(&pool, THRESHOLD, MigrationConfig::default())
        .await
        .unwrap();
    assert_eq!(report.versions_run, vec![1]);
    assert_eq!(report.to_recommended, 1);
    assert_eq!(report.to_raw, 1);
    assert_eq!(report.to_candidate, 0, "already-claimed row is off limits");

    let rows = snapshot(&pool).await;
    assert_eq!(
        rows,
        vec![
            ("https://a/1".into(), Some("recommended".into()), None),
            ("https://a/2".into(), Some("exited".into()), Some("quality_dropped".into())),
            ("https://a/3".into(), Some("raw".into()), None),
        ]
    );
}

#[tokio::test]
async fn tiny_batches_still_drain_everything() {
    let pool = memory_pool().await.unwrap();
    for i in 0..7 {
        seed(&pool, &format!("https://a/{i}"), Some(8.0), false, false).await;
    }

    let cfg = MigrationConfig { batch_size: 2, sample_limit: 1 };
    let report = run_startup_migrations(&pool, THRESHOLD, cfg).await.unwrap();

    assert_eq!(report.to_candidate, 7);
    assert!(report.batches >= 4);
    assert!(settings::migration_completed(&pool, 1).await.unwrap());

    let (remaining,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM items WHERE pool_status IS NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(remaining, 0);

    let count = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM items WHERE pool_status = ?",
    )
    .bind(PoolStatus::Candidate)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count.0, 7);
}
