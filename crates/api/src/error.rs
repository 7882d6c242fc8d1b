//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use serde_json::{Value, json};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or unknown credentials.
    Unauthorized(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain logic error.
    Domain(DomainError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, Value::Null),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, Value::Null),
            ApiError::Domain(err) => domain_error_to_response(err),
        };

        let body = json!({ "error": message, "details": details });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String, Value) {
    let message = err.to_string();
    match err {
        DomainError::NotFound { .. } => (StatusCode::NOT_FOUND, message, Value::Null),
        DomainError::Conflict(_) | DomainError::InvalidStateTransition { .. } => {
            (StatusCode::CONFLICT, message, Value::Null)
        }
        DomainError::InvalidInput(_) => (StatusCode::BAD_REQUEST, message, Value::Null),
        DomainError::Forbidden(_) => (StatusCode::FORBIDDEN, message, Value::Null),
        DomainError::InsufficientStock {
            medicine,
            available,
            requested,
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            message,
            json!({ "medicine": medicine, "available": available, "requested": requested }),
        ),
        DomainError::PrescriptionInvalid { medicine, issue } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            message,
            json!({ "medicine": medicine, "issue": issue.to_string() }),
        ),
        DomainError::CartValidationFailed {
            errors,
            prescription_issues,
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            message,
            json!({ "errors": errors, "prescription_issues": prescription_issues }),
        ),
        DomainError::Store(source) => {
            tracing::error!(error = %source, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Value::Null,
            )
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}
