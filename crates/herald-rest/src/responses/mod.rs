//! API response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use herald_jobs::JobError;
use serde::{Deserialize, Serialize};
use validator::ValidationErrors;

/// Error body returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Application error type for Axum.
#[derive(Debug)]
pub enum AppError {
    /// The request body is unusable.
    BadRequest(String),
    /// A job queue operation failed.
    Jobs(JobError),
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        Self::Jobs(err)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| {
                    let message = error
                        .message
                        .as_ref()
                        .map_or_else(|| error.code.to_string(), ToString::to_string);
                    format!("{field}: {message}")
                })
            })
            .collect();
        messages.sort();
        Self::BadRequest(messages.join("; "))
    }
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Jobs(JobError::QueueUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_UNAVAILABLE")
            }
            Self::Jobs(_) => (StatusCode::INTERNAL_SERVER_ERROR, "JOB_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let error = match self {
            Self::BadRequest(message) => message,
            Self::Jobs(err) => err.to_string(),
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Result type for Axum handlers.
pub type ApiResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_errors_map_to_503() {
        let err = AppError::from(JobError::QueueUnavailable("down".to_string()));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_other_job_errors_map_to_500() {
        let err = AppError::from(JobError::UnknownJob("x".to_string()));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[derive(Debug, validator::Validate)]
    struct Recipient {
        #[validate(email(message = "Recipient must be an email address"))]
        to: String,
        #[validate(length(min = 1))]
        subject: String,
    }

    #[test]
    fn test_validation_errors_name_each_field() {
        let invalid = Recipient {
            to: "nobody".to_string(),
            subject: String::new(),
        };
        let errors = validator::Validate::validate(&invalid).unwrap_err();

        match AppError::from(errors) {
            AppError::BadRequest(message) => assert_eq!(
                message,
                "subject: length; to: Recipient must be an email address"
            ),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
