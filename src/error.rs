use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Tool index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Tool index not ready: {0}")]
    IndexNotReady(String),

    #[error("Tool provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Service temporarily unavailable: {0}")]
    ResourceError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::ValidationError(msg) => {
                tracing::warn!(error = %msg, "Validation error");
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            AppError::IndexUnavailable(msg) => {
                tracing::error!(error = %msg, "Tool index unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::IndexNotReady(msg) => {
                tracing::warn!(error = %msg, "Tool index not ready");
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::ProviderUnreachable(msg) => {
                tracing::error!(error = %msg, "Tool provider unreachable");
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::EmbeddingFailure(msg) => {
                tracing::error!(error = %msg, "Embedding error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::ResourceError(msg) => {
                tracing::warn!(error = %msg, "Resource error");
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<ort::Error> for AppError {
    fn from(err: ort::Error) -> Self {
        AppError::EmbeddingFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
