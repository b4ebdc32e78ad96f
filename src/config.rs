// src/config.rs
//! Engine configuration: TOML file with env overrides.
//!
//! Resolution order:
//! 1) $ENGINE_CONFIG_PATH (error if it points nowhere)
//! 2) config/engine.toml
//! 3) built-in defaults
//! Individual env overrides (ENGINE_DATABASE_URL, ENGINE_SCORE_THRESHOLD,
//! ENGINE_BIND_ADDR) win over whatever the file said.

use crate::migrate::MigrationConfig;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const ENV_PATH: &str = "ENGINE_CONFIG_PATH";
const ENV_DATABASE_URL: &str = "ENGINE_DATABASE_URL";
const ENV_THRESHOLD: &str = "ENGINE_SCORE_THRESHOLD";
const ENV_BIND_ADDR: &str = "ENGINE_BIND_ADDR";

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Classify threshold; scores at or above it qualify as candidates.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    /// Bounded store timeout; a busy database fails the operation instead
    /// of blocking indefinitely.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_migration_batch_size")]
    pub migration_batch_size: usize,
    #[serde(default = "default_migration_sample_limit")]
    pub migration_sample_limit: usize,
}

fn default_database_url() -> String {
    "sqlite://feed_triage.db".to_string()
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_score_threshold() -> f64 {
    6.5
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_migration_batch_size() -> usize {
    200
}
fn default_migration_sample_limit() -> usize {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        // serde defaults double as the programmatic defaults.
        toml::from_str("").expect("empty config parses to defaults")
    }
}

impl EngineConfig {
    /// Load using env var + fallbacks, then apply env overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_path = PathBuf::from("config/engine.toml");
            if default_path.exists() {
                Self::load_from(&default_path)?
            } else {
                Self::default()
            }
        };

        if let Ok(url) = std::env::var(ENV_DATABASE_URL) {
            cfg.database_url = url;
        }
        if let Ok(addr) = std::env::var(ENV_BIND_ADDR) {
            cfg.bind_addr = addr;
        }
        if let Ok(t) = std::env::var(ENV_THRESHOLD) {
            cfg.score_threshold = t
                .parse()
                .with_context(|| format!("{ENV_THRESHOLD} must be a number, got '{t}'"))?;
        }
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn migration(&self) -> MigrationConfig {
        MigrationConfig {
            batch_size: self.migration_batch_size.max(1),
            sample_limit: self.migration_sample_limit.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.score_threshold, 6.5);
        assert_eq!(cfg.migration().batch_size, 200);
        assert!(cfg.database_url.starts_with("sqlite://"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: EngineConfig = toml::from_str(r#"score_threshold = 7.25"#).unwrap();
        assert_eq!(cfg.score_threshold, 7.25);
        assert_eq!(cfg.busy_timeout_ms, 5_000);
    }

    #[serial_test::serial]
    #[test]
    fn env_overrides_win_over_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("engine.toml");
        std::fs::write(&path, "score_threshold = 1.0\n").unwrap();

        env::set_var(ENV_PATH, path.display().to_string());
        env::set_var(ENV_THRESHOLD, "9.5");
        let cfg = EngineConfig::load().unwrap();
        env::remove_var(ENV_PATH);
        env::remove_var(ENV_THRESHOLD);

        assert_eq!(cfg.score_threshold, 9.5);
    }

    #[serial_test::serial]
    #[test]
    fn missing_env_path_is_an_error() {
        env::set_var(ENV_PATH, "/definitely/not/here.toml");
        let err = EngineConfig::load().unwrap_err();
        env::remove_var(ENV_PATH);
        assert!(err.to_string().contains(ENV_PATH));
    }
}
