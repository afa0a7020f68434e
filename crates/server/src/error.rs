//! Server and request error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use restream_engine::EngineError;
use serde_json::json;
use thiserror::Error;

use crate::connector::ConnectorError;

/// Errors starting or running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server has already been started.
    #[error("the server has already been started")]
    AlreadyStarted,

    /// Failed to bind to the listen address.
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),
}

/// Request-level errors, rendered as `{"error": …}` JSON.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The engine rejected or failed the operation.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The upstream connector refused to open a source.
    #[error("upstream connector error: {0}")]
    Connector(ConnectorError),

    /// The request itself is unusable.
    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Engine(EngineError::StreamNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Engine(EngineError::ShutDown) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Connector(_) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
