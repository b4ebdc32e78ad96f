//! Feed Triage Engine — Binary Entrypoint
//! Boots the store, runs pending data migrations, then serves the Axum API.

use std::time::Duration;

use feed_triage_engine::config::EngineConfig;
use feed_triage_engine::metrics::Metrics;
use feed_triage_engine::migrate;
use feed_triage_engine::store;
use feed_triage_engine::{create_router, AppState};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feed_triage_engine=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = EngineConfig::load()?;
    info!(?cfg, "engine config loaded");

    let metrics = Metrics::init();

    let db = store::init::connect(&cfg.database_url, Duration::from_millis(cfg.busy_timeout_ms))
        .await?;

    // Gated by persisted completion flags; cheap on an already-migrated store.
    let report = migrate::run_startup_migrations(&db, cfg.score_threshold, cfg.migration()).await?;
    if !report.versions_run.is_empty() {
        info!(?report, "data migration report");
    }

    let state = AppState {
        db,
        score_threshold: cfg.score_threshold,
    };
    let router = create_router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!(addr = %cfg.bind_addr, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}
