use crate::engine::RewardsError;
use crate::orchestration::ServiceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<RewardsError> for AppError {
    fn from(err: RewardsError) -> Self {
        let message = err.to_string();
        match err {
            RewardsError::InvalidAddress(_)
            | RewardsError::LengthMismatch { .. }
            | RewardsError::InvalidWindow { .. }
            | RewardsError::InvalidRewardShares(_)
            | RewardsError::InvalidAmount(_) => AppError::BadRequest(message),
            RewardsError::ProgramNotFound(_) | RewardsError::PositionNotFound(_) => {
                AppError::NotFound(message)
            }
            RewardsError::AccessDenied { .. } => AppError::Forbidden(message),
            RewardsError::DuplicateProgram(_)
            | RewardsError::AlreadyCommitted(_)
            | RewardsError::MaxRewardsExceeded { .. }
            | RewardsError::MaxRewardsPerEpochExceeded { .. }
            | RewardsError::CeilingBelowAllocated { .. }
            | RewardsError::NoRewards => AppError::Conflict(message),
            RewardsError::InvariantViolation(_)
            | RewardsError::Overflow(_)
            | RewardsError::External(_) => {
                tracing::error!(error = %message, "Engine operation failed");
                AppError::Internal(message)
            }
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Rewards(e) => e.into(),
            other => {
                tracing::error!(error = %other, "Service persistence failed");
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
