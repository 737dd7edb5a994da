use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: u64 },

    #[error("Upstream failure: {0}")]
    Upstream(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(_) | AppError::Io(_) | AppError::Join(_) | AppError::Anyhow(_) => {
                tracing::error!("Internal error: {:?}", err);
                Self::Internal("Internal server error".to_string())
            }
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::Validation(msg),
            AppError::Auth(msg) => Self::Forbidden(msg),
            AppError::RateLimited { retry_after_secs } => Self::RateLimited { retry_after_secs },
            AppError::OpenAI(err) => {
                tracing::error!("Upstream LLM error: {:?}", err);
                Self::Upstream("Upstream model call failed".to_string())
            }
            AppError::Upstream(msg) | AppError::Processing(msg) => Self::Upstream(msg),
            AppError::Reqwest(err) => {
                tracing::error!("Upstream transport error: {:?}", err);
                Self::Upstream("Upstream service unreachable".to_string())
            }
            AppError::LLMParsing(msg) => {
                tracing::error!("LLM response parsing failed: {msg}");
                Self::Upstream("Upstream model returned an unusable response".to_string())
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {msg}");
                Self::Internal("Internal server error".to_string())
            }
        }
    }
}

/// The JSON error envelope every endpoint shares.
#[derive(Serialize, Debug)]
struct ErrorResponse {
    success: bool,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail, retry_after) = match self {
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                None,
            ),
            Self::Validation(message) => (StatusCode::UNPROCESSABLE_ENTITY, message, None),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message, None),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message, None),
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, message, None),
            Self::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests".to_string(),
                Some(retry_after_secs),
            ),
            Self::Upstream(message) => (StatusCode::BAD_GATEWAY, message, None),
        };

        let body = Json(ErrorResponse {
            success: false,
            detail,
        });

        let mut response = (status, body).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
