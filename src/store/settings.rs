//! Key/value settings, including the migration completion map.
//!
//! Completion flags are keyed `migration_completed_v{N}`; version numbers
//! only increase, and a set flag lets engine start skip that migration's
//! full pass entirely.

use crate::error::{Error, Result};
use sqlx::SqlitePool;

pub async fn get_setting<T>(pool: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("parse setting '{key}': {e}")))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub async fn set_setting<T>(pool: &SqlitePool, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

fn migration_key(version: i32) -> String {
    format!("migration_completed_v{version}")
}

pub async fn migration_completed(pool: &SqlitePool, version: i32) -> Result<bool> {
    Ok(get_setting::<bool>(pool, &migration_key(version))
        .await?
        .unwrap_or(false))
}

pub async fn set_migration_completed(pool: &SqlitePool, version: i32) -> Result<()> {
    set_setting(pool, &migration_key(version), true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::init::memory_pool;

    #[tokio::test]
    async fn settings_roundtrip_and_upsert() {
        let pool = memory_pool().await.unwrap();
        assert_eq!(get_setting::<i64>(&pool, "k").await.unwrap(), None);

        set_setting(&pool, "k", 41).await.unwrap();
        set_setting(&pool, "k", 42).await.unwrap();
        assert_eq!(get_setting::<i64>(&pool, "k").await.unwrap(), Some(42));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM settings WHERE key = 'k'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn migration_flags_default_false() {
        let pool = memory_pool().await.unwrap();
        assert!(!migration_completed(&pool, 1).await.unwrap());
        set_migration_completed(&pool, 1).await.unwrap();
        assert!(migration_completed(&pool, 1).await.unwrap());
        assert!(!migration_completed(&pool, 2).await.unwrap());
    }
}
