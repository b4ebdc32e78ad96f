//! HTTP surface for the engine's collaborators.
//!
//! Write path: transition endpoints driven by the scorer/prefilter and the
//! source-management side (`reject`, `classify`, `promote`, `exit`,
//! `stale`, recompute triggers). Read path: funnel, source counters, and
//! item listings for the UI/reporting side. Scoring itself stays external —
//! `classify` receives the score, the threshold comes from config.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;

use crate::error::Error;
use crate::funnel::{self, FunnelReport};
use crate::model::{ExitReason, Item, NewItem, PoolStatus, SourceCounters};
use crate::pool::{self, SweepReport, Transition};
use crate::stats;
use crate::store::{items, sources};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub score_threshold: f64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/items", post(observe_item).get(list_items))
        .route("/items/{id}/reject", post(reject_item))
        .route("/items/{id}/classify", post(classify_item))
        .route("/items/{id}/promote", post(promote_item))
        .route("/items/{id}/exit", post(exit_item))
        .route("/items/{id}/stale", post(stale_item))
        .route("/sources", get(list_sources))
        .route("/sources/{id}/counters", get(source_counters))
        .route("/sources/{id}/recompute", post(recompute_source))
        .route("/sources/{id}/sweep-stale", post(sweep_source))
        .route("/sources/recompute-worst", post(recompute_worst))
        .route("/funnel", get(get_funnel))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Typed engine errors mapped onto HTTP statuses. Invalid transitions are
/// conflicts, not server faults.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::ItemNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidTransition { .. } | Error::InvalidExitReason { .. } => {
                StatusCode::CONFLICT
            }
            Error::Database(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn bad_request(msg: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
}

async fn observe_item(
    State(state): State<AppState>,
    Json(new): Json<NewItem>,
) -> Result<Json<Item>, ApiError> {
    sources::ensure(&state.db, &new.source_id, None).await?;
    let item = items::observe(&state.db, &new).await?;
    Ok(Json(item))
}

#[derive(serde::Deserialize)]
struct ItemsQuery {
    status: String,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

async fn list_items(
    State(state): State<AppState>,
    Query(q): Query<ItemsQuery>,
) -> Result<Json<Vec<Item>>, Response> {
    let status: PoolStatus = q
        .status
        .parse()
        .map_err(bad_request)?;
    let list = items::list_by_status(&state.db, status, q.source_id.as_deref(), q.limit.clamp(1, 1_000))
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    Ok(Json(list))
}

async fn reject_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Transition>, ApiError> {
    Ok(Json(pool::reject(&state.db, &id).await?))
}

#[derive(serde::Deserialize)]
struct ClassifyReq {
    score: f64,
}

async fn classify_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ClassifyReq>,
) -> Result<Json<Transition>, ApiError> {
    let t = pool::classify(&state.db, &id, body.score, state.score_threshold).await?;
    Ok(Json(t))
}

async fn promote_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Transition>, ApiError> {
    Ok(Json(pool::promote(&state.db, &id).await?))
}

#[derive(serde::Deserialize)]
struct ExitReq {
    reason: ExitReason,
}

async fn exit_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ExitReq>,
) -> Result<Json<Transition>, ApiError> {
    Ok(Json(pool::exit(&state.db, &id, body.reason).await?))
}

async fn stale_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Transition>, ApiError> {
    Ok(Json(pool::mark_stale(&state.db, &id).await?))
}

async fn list_sources(
    State(state): State<AppState>,
) -> Result<Json<Vec<SourceCounters>>, ApiError> {
    Ok(Json(sources::list(&state.db).await?))
}

async fn source_counters(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SourceCounters>, ApiError> {
    match sources::get_counters(&state.db, &id).await? {
        Some(c) => Ok(Json(c)),
        None => Err(Error::ItemNotFound(format!("source {id}")).into()),
    }
}

async fn recompute_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SourceCounters>, ApiError> {
    Ok(Json(stats::recompute(&state.db, &id).await?))
}

async fn sweep_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SweepReport>, ApiError> {
    Ok(Json(pool::sweep_stale(&state.db, Some(&id)).await?))
}

async fn recompute_worst(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let flagged = stats::refresh_worst_performers(&state.db).await?;
    Ok(Json(json!({ "flagged": flagged })))
}

#[derive(serde::Deserialize)]
struct FunnelQuery {
    #[serde(default)]
    source_id: Option<String>,
}

async fn get_funnel(
    State(state): State<AppState>,
    Query(q): Query<FunnelQuery>,
) -> Result<Json<FunnelReport>, ApiError> {
    Ok(Json(funnel::compute(&state.db, q.source_id.as_deref()).await?))
}
