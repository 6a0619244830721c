//! API error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use engine::EngineError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnknownWorkflow(name) => Self::NotFound(name),
            other => Self::Engine(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Engine(EngineError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            // Graph, input and parse errors are all problems with the request.
            Self::Engine(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "WORKFLOW_NOT_FOUND",
            Self::Engine(EngineError::Graph(_)) => "INVALID_WORKFLOW",
            Self::Engine(EngineError::MissingInput { .. } | EngineError::InputType { .. }) => {
                "INVALID_INPUT"
            }
            Self::Engine(EngineError::Io(_)) => "INTERNAL_ERROR",
            Self::Engine(_) => "ENGINE_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
