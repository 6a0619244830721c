//! `api` crate: HTTP REST API over the workflow engine.
//!
//! Exposes:
//!   GET    /api/v1/workflows
//!   GET    /api/v1/workflows/{name}
//!   POST   /api/v1/workflows/{name}/execute
//!
//! Runs execute inside the request; the response body is the `RunResult`.

mod error;
mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use engine::WorkflowEngine;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::ApiError;
pub use handlers::executions::ExecuteRequest;
pub use handlers::workflows::WorkflowSummary;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
}

impl AppState {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

/// Build the API router with CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/workflows", get(handlers::workflows::list))
        .route("/api/v1/workflows/{name}", get(handlers::workflows::get))
        .route(
            "/api/v1/workflows/{name}/execute",
            post(handlers::executions::execute),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `bind` and serve the API until the process exits.
pub async fn serve(bind: &str, engine: WorkflowEngine) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, workflows = engine.workflow_names().len(), "API server listening");
    axum::serve(listener, router(AppState::new(engine))).await
}
