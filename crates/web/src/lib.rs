//! notemerge web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - Status and health endpoints
//! - Merge session API (fetch, load, resolve, export)
//! - WebSocket endpoint forwarding engine events

pub mod api;
pub mod ws;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use notemerge_core::config::AppConfig;
use notemerge_core::engine::ResolutionEngine;
use notemerge_core::producer::ProcessProducer;

use crate::api::status::AppError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    /// Single-writer lock around the live merge session.
    pub engine: Mutex<ResolutionEngine>,
    pub producer: ProcessProducer,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            engine: Mutex::new(ResolutionEngine::from_config(&config.engine)),
            producer: ProcessProducer::new(&config.producer),
            config,
        }
    }

    /// Lock the engine, mapping a poisoned lock to an internal error.
    pub fn engine(&self) -> Result<MutexGuard<'_, ResolutionEngine>, AppError> {
        self.engine
            .lock()
            .map_err(|e| AppError::Internal(format!("engine lock: {}", e)))
    }
}

/// Build the full application router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    let body_limit = state.config.web.max_body_bytes;

    Router::new()
        // API routes
        .merge(api::status::routes())
        .merge(api::merge::routes())
        // WebSocket
        .merge(ws::routes())
        // Middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: AppConfig) -> Self {
        Self {
            state: Arc::new(AppState::new(config)),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn start<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = self.state.config.web.listen.parse()?;
        let app = router(self.state);

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("web server stopped");
        Ok(())
    }
}
