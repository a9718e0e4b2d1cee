use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fmt;

/// Synchronous API failures. Everything that happens after a job has been
/// queued is captured on the job row instead and never surfaces here.
#[derive(Debug)]
pub enum AppError {
    /// Bad URL, disallowed page type, missing field. Rejected before a job exists.
    Validation(String),
    /// Fixed-window ceiling reached for the caller's key.
    RateLimited {
        remaining: i32,
        reset_at: DateTime<Utc>,
    },
    NotFound(String),
    /// Underlying table missing or unreachable.
    Storage(String),
    Unauthorized,
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "{}", msg),
            AppError::RateLimited { .. } => {
                write!(f, "Daily audit limit reached. Please try again tomorrow.")
            }
            AppError::NotFound(msg) => write!(f, "{}", msg),
            AppError::Storage(_) => write!(
                f,
                "Our database is being set up. Please try again in a few minutes."
            ),
            AppError::Unauthorized => write!(f, "Unauthorized"),
            AppError::Internal(_) => {
                write!(f, "Something went wrong. Please try again later.")
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Keep the internal detail in logs, not in the response body.
        if let AppError::Storage(detail) | AppError::Internal(detail) = &self {
            tracing::error!("request failed: {}", detail);
        }

        let body = match &self {
            AppError::RateLimited {
                remaining,
                reset_at,
            } => Json(json!({
                "error": self.to_string(),
                "remaining": remaining,
                "resetAt": reset_at,
            })),
            _ => Json(json!({ "error": self.to_string() })),
        };

        (status, body).into_response()
    }
}
