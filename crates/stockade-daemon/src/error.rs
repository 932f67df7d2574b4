//! Errors surfaced by the scheduler and their HTTP mapping

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use stockade_core::StockadeError;
use stockade_core::protocol::ErrorResponse;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("queue is full")]
    QueueFull,

    #[error("shutting down")]
    ShuttingDown,

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("job not found")]
    NotFound,

    #[error("journal error: {0}")]
    Journal(#[from] StockadeError),
}

impl SchedulerError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnsupportedLanguage(_) | Self::InvalidSubmission(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Journal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let error = match &self {
            Self::Journal(e) => {
                tracing::error!(error = %e, "journal write failed");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (self.status_code(), Json(ErrorResponse { error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(SchedulerError::QueueFull.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(SchedulerError::ShuttingDown.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            SchedulerError::UnsupportedLanguage("cobol".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(SchedulerError::NotFound.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn journal_errors_hide_details() {
        let err = SchedulerError::from(StockadeError::Execution("disk /var full".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
