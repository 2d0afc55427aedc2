use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Reasons a training run refuses to produce an artifact
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TrainingFailure {
    #[error("dataset is empty")]
    EmptyDataset,

    #[error("invalid hyperparameters: {0}")]
    InvalidHyperparameters(String),

    #[error("non-finite parameter after epoch {epoch}")]
    NonFiniteParameters { epoch: usize },

    #[error("training loss did not decrease over the last {window} epochs ({from:.6} -> {to:.6})")]
    Diverged { window: usize, from: f64, to: f64 },

    #[error("training exceeded timeout of {0:?}")]
    Timeout(Duration),
}

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Invalid rating value: {0} (expected 1..=5)")]
    InvalidRatingValue(i64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Training failed: {0}")]
    TrainingFailure(#[from] TrainingFailure),

    #[error("Publish rejected: {0}")]
    PublishRejected(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidRatingValue(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::SourceUnavailable(_) | AppError::Database(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::TrainingFailure(_) | AppError::PublishRejected(_) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::Cache(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
