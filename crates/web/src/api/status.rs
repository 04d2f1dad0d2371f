//! Status and health check endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::warn;

use notemerge_core::errors::{EngineError, MergeResultError, ProducerError, ReconcileError};

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
}

/// Summary of the live merge session.
#[derive(Serialize)]
struct StatusResponse {
    state: String,
    session_id: Option<String>,
    policy: String,
    conflicts: usize,
    pending: usize,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/status/health", get(health_check))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let snapshot = state.engine()?.snapshot();

    Ok(Json(StatusResponse {
        state: snapshot.state.to_string(),
        session_id: snapshot.session_id.map(|id| id.to_string()),
        policy: snapshot.policy.to_string(),
        conflicts: snapshot.sites.len(),
        pending: snapshot.pending,
    }))
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// API error type that converts to an Axum response.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    BadGateway(String),
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let msg = err.to_string();
        match err {
            EngineError::NotLoaded => AppError::Conflict(msg),
            EngineError::UnknownConflictKey(_) => AppError::NotFound(msg),
            EngineError::AlternativeNotPermitted { .. } | EngineError::InvalidCommand(_) => {
                AppError::BadRequest(msg)
            }
            EngineError::MalformedMergeResult(_) => AppError::Unprocessable(msg),
            EngineError::Reconcile(
                ReconcileError::AnchorNotFound { .. } | ReconcileError::AmbiguousAnchor { .. },
            ) => AppError::Conflict(msg),
            EngineError::Reconcile(_) => AppError::BadRequest(msg),
        }
    }
}

impl From<MergeResultError> for AppError {
    fn from(err: MergeResultError) -> Self {
        EngineError::from(err).into()
    }
}

impl From<ProducerError> for AppError {
    fn from(err: ProducerError) -> Self {
        AppError::BadGateway(err.to_string())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
