//! Merge session API endpoints.
//!
//! The producer runs without holding the engine lock; its payload is
//! validated first and then loaded in one step, so a failed fetch never
//! touches the live session.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use notemerge_core::conflict::{ConflictSite, Resolution};
use notemerge_core::engine::{EngineSnapshot, FinalOutput, LoadSummary, ResolveCommand, SessionState};
use notemerge_core::model::MergeResult;
use notemerge_core::producer::MergeProducer;

use crate::api::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct FetchRequest {
    /// Extra arguments for the producer, typically the note files to merge.
    #[serde(default)]
    pub inputs: Vec<String>,
}

#[derive(Serialize)]
struct ResolveResponse {
    resolution: Resolution,
    changed: bool,
    pending: usize,
    complete: bool,
    state: SessionState,
    text: String,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/merge", get(get_session))
        .route("/api/merge/fetch", post(fetch_merge))
        .route("/api/merge/load", post(load_merge))
        .route("/api/merge/conflicts", get(list_pending))
        .route("/api/merge/resolve", post(resolve_conflict))
        .route("/api/merge/export", get(export_merge))
}

async fn get_session(State(state): State<Arc<AppState>>) -> Result<Json<EngineSnapshot>, AppError> {
    Ok(Json(state.engine()?.snapshot()))
}

async fn fetch_merge(
    State(state): State<Arc<AppState>>,
    body: Option<Json<FetchRequest>>,
) -> Result<Json<LoadSummary>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let payload = state.producer.run_merge(&request.inputs).await?;
    let result = MergeResult::from_value(payload)?;

    let summary = state.engine()?.load_result(result);
    info!(
        session_id = %summary.session_id,
        conflicts = summary.conflict_count,
        "loaded merge result from producer"
    );
    Ok(Json(summary))
}

async fn load_merge(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<LoadSummary>, AppError> {
    let summary = state.engine()?.load_value(payload)?;
    Ok(Json(summary))
}

async fn list_pending(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ConflictSite>>, AppError> {
    Ok(Json(state.engine()?.pending_conflicts()?))
}

async fn resolve_conflict(
    State(state): State<Arc<AppState>>,
    Json(cmd): Json<ResolveCommand>,
) -> Result<Json<ResolveResponse>, AppError> {
    let mut engine = state.engine()?;
    let outcome = engine.resolve_command(&cmd)?;

    Ok(Json(ResolveResponse {
        resolution: outcome.resolution,
        changed: outcome.changed,
        pending: outcome.pending,
        complete: outcome.complete,
        state: engine.state(),
        text: engine.current_text()?.to_string(),
    }))
}

async fn export_merge(State(state): State<Arc<AppState>>) -> Result<Json<FinalOutput>, AppError> {
    Ok(Json(state.engine()?.finalize()?))
}
