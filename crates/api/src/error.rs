use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine::EngineError;
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("webhook payload must be a JSON object")]
    InvalidPayload,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RunNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidPayload => StatusCode::BAD_REQUEST,
            Self::Engine(EngineError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Engine(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
